//! Catalog documents as they are stored by the client.
//!
//! The structs mirror the JSON kept in the key-value document store, so field
//! names are camelCase on the wire. Stored data was written by hand-edited
//! admin forms over a long time, which is why numbers are parsed loosely: an
//! episode number may arrive as `3`, `3.0` or `"3"`, and a title id may be a
//! number or a string.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::video_source::VideoRef;

/// One anime series in the catalog. Identity is `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Title {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// Raw value as stored; see [`Title::declared_episode_count`].
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub total_episodes: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<VideoRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub episodes: Vec<Episode>,
    #[serde(default)]
    pub views: u64,
}

impl Title {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            genre: None,
            language: None,
            thumbnail: None,
            total_episodes: Value::Null,
            video_url: None,
            episodes: Vec::new(),
            views: 0,
        }
    }

    /// Episode count declared on the title, if it parses as a positive number.
    pub fn declared_episode_count(&self) -> Option<i64> {
        loose_int(&self.total_episodes).filter(|count| *count > 0)
    }

    /// First stored episode record whose number parses to `number`.
    pub fn episode(&self, number: i64) -> Option<&Episode> {
        self.episodes
            .iter()
            .find(|episode| episode.number() == Some(number))
    }
}

/// A single episode row owned by its parent [`Title`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    #[serde(default)]
    pub episode: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<VideoRef>,
}

impl Episode {
    pub fn new(number: i64, video_url: Option<VideoRef>) -> Self {
        Self {
            episode: Value::from(number),
            video_url,
        }
    }

    /// The episode number, or `None` when the stored field is not numeric.
    pub fn number(&self) -> Option<i64> {
        loose_int(&self.episode)
    }
}

/// One row of the watch-history ledger. At most one exists per title.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatchHistoryEntry {
    #[serde(deserialize_with = "string_or_number")]
    pub title_id: String,
    pub episode: i64,
    pub progress: f64,
    pub last_watched: DateTime<Utc>,
}

/// Parses an integer the way form input is usually read: numbers are
/// truncated, strings contribute their leading (optionally signed) digits.
pub fn loose_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(text) => parse_leading_int(text),
        _ => None,
    }
}

/// Leading-integer parse of a request parameter such as `"12"` or `"12abc"`.
pub fn parse_leading_int(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|value| sign * value)
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, found {other}"
        ))),
    }
}
