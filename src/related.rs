//! "More like this" selection for the watch page.

use serde::Serialize;

use crate::catalog::Title;
use crate::episodes::first_episode;

pub const MAX_RELATED_TITLES: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedTitle {
    pub title: Title,
    /// Episode the related card links to.
    pub first_episode: i64,
}

/// Up to four titles other than `exclude_id`, same-genre titles first.
///
/// If no other title shares `genre`, any other titles are used instead. Order
/// is catalog (insertion) order; there is no popularity ranking.
pub fn related_titles(all: &[Title], exclude_id: &str, genre: Option<&str>) -> Vec<RelatedTitle> {
    let candidates: Vec<&Title> = all.iter().filter(|title| title.id != exclude_id).collect();

    let same_genre: Vec<&Title> = match genre {
        Some(genre) => candidates
            .iter()
            .copied()
            .filter(|title| title.genre.as_deref() == Some(genre))
            .collect(),
        None => Vec::new(),
    };

    let pool = if same_genre.is_empty() {
        candidates
    } else {
        same_genre
    };

    pool.into_iter()
        .take(MAX_RELATED_TITLES)
        .map(|title| RelatedTitle {
            first_episode: first_episode(title),
            title: title.clone(),
        })
        .collect()
}
