//! Watch-session orchestration.
//!
//! Opening a title's watch page is the one operation that touches both
//! stores: it counts a view on the catalog and starts a history entry at 0%.
//! Everything else on the page is derived from the catalog snapshot loaded
//! here.

use serde::Serialize;
use tracing::info;

use crate::catalog::{Title, parse_leading_int};
use crate::episodes::{EpisodeSlot, first_episode, list_episodes};
use crate::error::{CoreError, CoreResult};
use crate::history::record_watch;
use crate::related::{RelatedTitle, related_titles};
use crate::store::{CatalogStore, HistoryStore};
use crate::video_source::{RenderableDescriptor, resolve_video};

/// Everything the watch page renders.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchPage {
    pub title: Title,
    pub episode: i64,
    pub video: RenderableDescriptor,
    pub episodes: Vec<EpisodeSlot>,
    pub related: Vec<RelatedTitle>,
}

/// Counts a view for `title_id` and records the session start in history.
pub fn start_watch_session<C, H>(
    catalog: &C,
    history: &H,
    title_id: &str,
    episode: Option<i64>,
) -> CoreResult<Title>
where
    C: CatalogStore + ?Sized,
    H: HistoryStore + ?Sized,
{
    let mut titles = catalog.get_all_titles()?;
    let (title, _) = open_session(catalog, history, &mut titles, title_id, episode)?;
    Ok(title)
}

/// Starts a session and assembles the watch page for `episode_param`, the raw
/// episode value from the request (missing or unparsable means the first
/// episode).
pub fn watch_page<C, H>(
    catalog: &C,
    history: &H,
    title_id: &str,
    episode_param: Option<&str>,
) -> CoreResult<WatchPage>
where
    C: CatalogStore + ?Sized,
    H: HistoryStore + ?Sized,
{
    let mut titles = catalog.get_all_titles()?;
    let requested = episode_param.and_then(parse_leading_int);
    let (title, episode) = open_session(catalog, history, &mut titles, title_id, requested)?;

    Ok(WatchPage {
        video: resolve_video(&title, Some(episode)),
        episodes: list_episodes(&title, Some(episode)),
        related: related_titles(&titles, &title.id, title.genre.as_deref()),
        episode,
        title,
    })
}

fn open_session<C, H>(
    catalog: &C,
    history: &H,
    titles: &mut [Title],
    title_id: &str,
    episode: Option<i64>,
) -> CoreResult<(Title, i64)>
where
    C: CatalogStore + ?Sized,
    H: HistoryStore + ?Sized,
{
    let title = titles
        .iter_mut()
        .find(|title| title.id == title_id)
        .ok_or_else(|| CoreError::MissingTitle(title_id.to_owned()))?;

    title.views = title.views.saturating_add(1);
    let title = title.clone();
    let episode = episode.unwrap_or_else(|| first_episode(&title));

    catalog.save_titles(titles)?;
    record_watch(history, &title.id, episode, 0.0)?;
    info!(title_id, episode, views = title.views, "watch session started");

    Ok((title, episode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Episode;
    use crate::store::MemoryStore;
    use crate::video_source::VideoRef;

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        let mut show = Title::new("1", "Show");
        show.genre = Some("Action".into());
        show.video_url = VideoRef::parse("https://cdn.example/default.mp4");
        show.episodes = vec![
            Episode::new(2, VideoRef::parse("https://cdn.example/ep2.mp4")),
            Episode::new(1, None),
        ];
        let mut other = Title::new("2", "Other");
        other.genre = Some("Action".into());
        let comedy = Title::new("3", "Comedy");
        store.save_titles(&[show, other, comedy]).unwrap();
        store
    }

    #[test]
    fn session_start_counts_a_view_and_records_history() {
        let store = seeded_store();
        let title = start_watch_session(&store, &store, "1", Some(2)).unwrap();
        assert_eq!(title.views, 1);

        let titles = store.get_all_titles().unwrap();
        assert_eq!(titles[0].views, 1);
        assert_eq!(titles[1].views, 0);

        let history = store.get_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].title_id, "1");
        assert_eq!(history[0].episode, 2);
        assert_eq!(history[0].progress, 0.0);
    }

    #[test]
    fn missing_title_is_reported() {
        let store = seeded_store();
        let err = start_watch_session(&store, &store, "99", None).unwrap_err();
        assert!(matches!(err, CoreError::MissingTitle(id) if id == "99"));
        assert!(store.get_history().unwrap().is_empty());
    }

    #[test]
    fn watch_page_assembles_all_parts() {
        let store = seeded_store();
        let page = watch_page(&store, &store, "1", Some("2")).unwrap();

        assert_eq!(page.episode, 2);
        assert_eq!(
            page.video,
            RenderableDescriptor::DirectVideo {
                url: "https://cdn.example/ep2.mp4".into()
            }
        );
        let current: Vec<(Option<i64>, bool)> = page
            .episodes
            .iter()
            .map(|slot| (slot.id, slot.is_current))
            .collect();
        assert_eq!(current, vec![(Some(1), false), (Some(2), true)]);
        assert_eq!(page.related.len(), 1);
        assert_eq!(page.related[0].title.id, "2");
    }

    #[test]
    fn watch_page_defaults_to_first_episode() {
        let store = seeded_store();
        let page = watch_page(&store, &store, "1", Some("abc")).unwrap();
        assert_eq!(page.episode, 1);
        assert_eq!(
            page.video,
            RenderableDescriptor::DirectVideo {
                url: "https://cdn.example/default.mp4".into()
            }
        );
    }

    #[test]
    fn each_page_open_counts_once() {
        let store = seeded_store();
        watch_page(&store, &store, "3", None).unwrap();
        let page = watch_page(&store, &store, "3", None).unwrap();
        assert_eq!(page.title.views, 2);
        assert_eq!(page.video, RenderableDescriptor::NoVideo);
    }
}
