//! Watch-history ledger.
//!
//! The ledger keeps one entry per title (not per episode), newest first, and
//! never more than [`MAX_HISTORY_ENTRIES`]. Every call reads the stored ledger,
//! applies one change and writes the whole ledger back.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::catalog::WatchHistoryEntry;
use crate::error::CoreResult;
use crate::store::HistoryStore;

pub const MAX_HISTORY_ENTRIES: usize = 20;

/// Default spacing between persisted progress ticks during playback.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Records progress for `title_id` at the current time.
pub fn record_watch<S>(
    store: &S,
    title_id: &str,
    episode: i64,
    progress: f64,
) -> CoreResult<Vec<WatchHistoryEntry>>
where
    S: HistoryStore + ?Sized,
{
    record_watch_at(store, title_id, episode, progress, Utc::now())
}

pub fn record_watch_at<S>(
    store: &S,
    title_id: &str,
    episode: i64,
    progress: f64,
    now: DateTime<Utc>,
) -> CoreResult<Vec<WatchHistoryEntry>>
where
    S: HistoryStore + ?Sized,
{
    let entry = WatchHistoryEntry {
        title_id: title_id.to_owned(),
        episode,
        progress: clamp_progress(progress),
        last_watched: now,
    };
    let ledger = apply_entry(store.get_history()?, entry);
    store.save_history(&ledger)?;
    debug!(title_id, episode, entries = ledger.len(), "watch history updated");
    Ok(ledger)
}

/// Pure ledger update: replace by title or append, newest first, truncate.
pub fn apply_entry(
    mut ledger: Vec<WatchHistoryEntry>,
    entry: WatchHistoryEntry,
) -> Vec<WatchHistoryEntry> {
    match ledger
        .iter_mut()
        .find(|existing| existing.title_id == entry.title_id)
    {
        Some(existing) => *existing = entry,
        None => ledger.push(entry),
    }

    // Older stored ledgers may carry duplicates; keep the newest per title.
    ledger.sort_by(|a, b| b.last_watched.cmp(&a.last_watched));
    let mut seen = std::collections::HashSet::new();
    ledger.retain(|entry| seen.insert(entry.title_id.clone()));
    ledger.truncate(MAX_HISTORY_ENTRIES);
    ledger
}

fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 100.0)
    }
}

/// Converts an element's elapsed/total seconds into a percentage.
/// Returns `None` until the duration is known.
pub fn progress_percent(current_time: f64, duration: f64) -> Option<f64> {
    if duration.is_nan() || duration <= 0.0 || !current_time.is_finite() {
        return None;
    }
    Some(clamp_progress(current_time / duration * 100.0))
}

/// Rate limiter in front of [`record_watch`] for playback ticks.
///
/// Media elements report time updates several times a second; only ticks at
/// least `min_interval` apart are forwarded. A forced tick (pause, ended)
/// always goes through.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    min_interval: Duration,
    last_sent: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_sent: None,
        }
    }

    /// Returns the progress to persist for this tick, if any.
    pub fn tick(&mut self, current_time: f64, duration: f64, now: Instant) -> Option<f64> {
        let progress = progress_percent(current_time, duration)?;
        let due = match self.last_sent {
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
            None => true,
        };
        if !due {
            return None;
        }
        self.last_sent = Some(now);
        Some(progress)
    }

    pub fn force(&mut self, current_time: f64, duration: f64, now: Instant) -> Option<f64> {
        let progress = progress_percent(current_time, duration)?;
        self.last_sent = Some(now);
        Some(progress)
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn repeated_progress_keeps_single_entry() {
        let store = MemoryStore::new();
        record_watch_at(&store, "T", 3, 50.0, base_time()).unwrap();
        let ledger =
            record_watch_at(&store, "T", 3, 75.0, base_time() + ChronoDuration::seconds(5)).unwrap();

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].progress, 75.0);
        assert_eq!(store.get_history().unwrap(), ledger);
    }

    #[test]
    fn new_episode_replaces_previous_one() {
        let store = MemoryStore::new();
        record_watch_at(&store, "T", 3, 90.0, base_time()).unwrap();
        let ledger =
            record_watch_at(&store, "T", 4, 0.0, base_time() + ChronoDuration::minutes(1)).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].episode, 4);
        assert_eq!(ledger[0].progress, 0.0);
    }

    #[test]
    fn ledger_is_newest_first_and_bounded() {
        let store = MemoryStore::new();
        for i in 0..25 {
            record_watch_at(
                &store,
                &format!("title-{i}"),
                1,
                10.0,
                base_time() + ChronoDuration::minutes(i),
            )
            .unwrap();
        }
        let ledger = store.get_history().unwrap();
        assert_eq!(ledger.len(), MAX_HISTORY_ENTRIES);
        assert_eq!(ledger[0].title_id, "title-24");
        assert_eq!(ledger[MAX_HISTORY_ENTRIES - 1].title_id, "title-5");
        assert!(
            ledger
                .windows(2)
                .all(|pair| pair[0].last_watched >= pair[1].last_watched)
        );
    }

    #[test]
    fn rewatching_moves_title_to_front() {
        let store = MemoryStore::new();
        record_watch_at(&store, "A", 1, 0.0, base_time()).unwrap();
        record_watch_at(&store, "B", 1, 0.0, base_time() + ChronoDuration::minutes(1)).unwrap();
        let ledger =
            record_watch_at(&store, "A", 2, 5.0, base_time() + ChronoDuration::minutes(2)).unwrap();
        let order: Vec<&str> = ledger.iter().map(|entry| entry.title_id.as_str()).collect();
        assert_eq!(order, vec!["A", "B"]);
    }

    #[test]
    fn stored_duplicates_are_collapsed() {
        let older = WatchHistoryEntry {
            title_id: "A".into(),
            episode: 1,
            progress: 1.0,
            last_watched: base_time(),
        };
        let newer = WatchHistoryEntry {
            last_watched: base_time() + ChronoDuration::minutes(1),
            ..older.clone()
        };
        let other = WatchHistoryEntry {
            title_id: "B".into(),
            last_watched: base_time() + ChronoDuration::minutes(2),
            ..older.clone()
        };
        let ledger = apply_entry(vec![older, newer.clone()], other);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger[1], newer);
    }

    #[test]
    fn progress_is_clamped() {
        let store = MemoryStore::new();
        let ledger = record_watch_at(&store, "T", 1, 140.0, base_time()).unwrap();
        assert_eq!(ledger[0].progress, 100.0);
        let ledger = record_watch_at(&store, "T", 1, -3.0, base_time()).unwrap();
        assert_eq!(ledger[0].progress, 0.0);
    }

    #[test]
    fn progress_requires_positive_duration() {
        assert_eq!(progress_percent(10.0, 0.0), None);
        assert_eq!(progress_percent(10.0, f64::NAN), None);
        assert_eq!(progress_percent(30.0, 120.0), Some(25.0));
    }

    #[test]
    fn throttle_spaces_out_ticks() {
        let start = Instant::now();
        let mut throttle = ProgressThrottle::new(Duration::from_secs(5));

        assert_eq!(throttle.tick(1.0, 100.0, start), Some(1.0));
        assert_eq!(throttle.tick(2.0, 100.0, start + Duration::from_secs(1)), None);
        assert_eq!(
            throttle.tick(6.0, 100.0, start + Duration::from_secs(5)),
            Some(6.0)
        );
        assert_eq!(
            throttle.force(7.0, 100.0, start + Duration::from_secs(6)),
            Some(7.0)
        );
        assert_eq!(throttle.tick(8.0, 100.0, start + Duration::from_secs(7)), None);
    }

    #[test]
    fn throttle_ignores_ticks_without_duration() {
        let mut throttle = ProgressThrottle::default();
        assert_eq!(throttle.tick(1.0, 0.0, Instant::now()), None);
        assert_eq!(throttle.tick(1.0, 10.0, Instant::now()), Some(10.0));
    }
}
