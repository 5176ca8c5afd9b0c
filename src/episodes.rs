//! Episode list derivation for the watch page.

use std::{cmp::Ordering, ops::RangeInclusive};

use serde::Serialize;
use tracing::warn;

use crate::catalog::Title;

/// Upper bound on an episode count declared with `totalEpisodes`.
pub const MAX_DECLARED_EPISODES: i64 = 10_000;

/// One button in the episode list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeSlot {
    /// `None` when the stored episode field is not numeric.
    pub id: Option<i64>,
    pub is_current: bool,
}

/// Lists the episodes of `title`, marking the one equal to `current`.
///
/// Stored episode records win over the declared count. Malformed duplicates
/// are passed through; non-numeric numbers sort after every valid one.
pub fn list_episodes(title: &Title, current: Option<i64>) -> Vec<EpisodeSlot> {
    let mut numbers: Vec<Option<i64>> = if title.episodes.is_empty() {
        declared_range(title).map(Some).collect()
    } else {
        title.episodes.iter().map(|episode| episode.number()).collect()
    };

    numbers.sort_by(|a, b| match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    numbers
        .into_iter()
        .map(|id| EpisodeSlot {
            id,
            is_current: id.is_some() && id == current,
        })
        .collect()
}

/// `1..=totalEpisodes`, defaulting to a single episode and clamped to
/// [`MAX_DECLARED_EPISODES`].
pub fn declared_range(title: &Title) -> RangeInclusive<i64> {
    let declared = title.declared_episode_count().unwrap_or(1);
    if declared > MAX_DECLARED_EPISODES {
        warn!(
            title_id = %title.id,
            declared,
            max = MAX_DECLARED_EPISODES,
            "clamping declared episode count"
        );
    }
    1..=declared.min(MAX_DECLARED_EPISODES)
}

/// Lowest valid episode number of a title, defaulting to 1.
pub fn first_episode(title: &Title) -> i64 {
    title
        .episodes
        .iter()
        .filter_map(|episode| episode.number())
        .min()
        .unwrap_or(1)
}
