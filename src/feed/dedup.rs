//! Decides which parsed entries are new for a feed.
//!
//! Everything here is pure: the poller loads the feed's seen identities,
//! asks [`select_new`] for the remainder and records the result.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::models::{EntryId, NewSeenEntry, ParsedEntry};

/// Entries of `parsed` (feed order, newest first) whose identity is not in
/// `seen`, returned oldest first.
///
/// Entries without a guid or link are dropped, and repeated identities within
/// one parse keep their first (newest) occurrence. When every entry carries a
/// publish date the result is ordered by it; otherwise the reversed feed order
/// is used as-is.
pub fn select_new(parsed: &[ParsedEntry], seen: &HashSet<EntryId>) -> Vec<ParsedEntry> {
    let mut batch = HashSet::new();
    let mut fresh: Vec<ParsedEntry> = parsed
        .iter()
        .filter(|entry| match entry.id() {
            Some(id) => !seen.contains(&id) && batch.insert(id),
            None => false,
        })
        .cloned()
        .collect();

    fresh.reverse();
    if fresh.iter().all(|e| e.published_at.is_some()) {
        fresh.sort_by_key(|e| e.published_at);
    }
    fresh
}

/// True when the entry was published more than `window` before it was first seen.
pub fn is_stale(entry: &ParsedEntry, first_seen: DateTime<Utc>, window: Duration) -> bool {
    entry
        .published_at
        .map(|published| published < first_seen - window)
        .unwrap_or(false)
}

/// Turns the new entries of one cycle into rows to record.
///
/// `priming` is set when the feed has no recorded entries yet: only the
/// newest entry is announced then, the rest are kept as history.
pub fn plan_records(
    new_entries: &[ParsedEntry],
    first_seen: DateTime<Utc>,
    freshness_window: Option<Duration>,
    priming: bool,
) -> Vec<NewSeenEntry> {
    let newest = new_entries.len().saturating_sub(1);
    new_entries
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| {
            let history = priming && i != newest;
            let stale = freshness_window
                .map(|window| is_stale(entry, first_seen, window))
                .unwrap_or(false);
            entry.to_seen(history || stale)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(guid: &str, published: Option<DateTime<Utc>>) -> ParsedEntry {
        ParsedEntry {
            guid: Some(guid.to_string()),
            title: guid.to_string(),
            link: format!("https://example.com/{guid}"),
            description: None,
            enclosures: Vec::new(),
            categories: Vec::new(),
            published_at: published,
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, hour, 0, 0).unwrap()
    }

    fn ids(entries: &[ParsedEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.title.as_str()).collect()
    }

    fn seen_set(entries: &[ParsedEntry]) -> HashSet<EntryId> {
        entries.iter().filter_map(ParsedEntry::id).collect()
    }

    #[test]
    fn only_unseen_entries_are_new() {
        let a3 = entry("a3", Some(at(0)));
        let b7 = entry("b7", Some(at(1)));
        let seen = seen_set(&[a3.clone()]);

        let new = select_new(&[b7, a3], &seen);
        assert_eq!(ids(&new), vec!["b7"]);
    }

    #[test]
    fn second_pass_over_same_parse_is_empty() {
        let parsed = vec![entry("b7", Some(at(1))), entry("a3", Some(at(0)))];
        let first = select_new(&parsed, &HashSet::new());
        assert_eq!(first.len(), 2);

        let seen = seen_set(&first);
        assert!(select_new(&parsed, &seen).is_empty());
    }

    #[test]
    fn new_entries_come_back_oldest_first() {
        let parsed = vec![
            entry("e3", Some(at(3))),
            entry("e1", Some(at(1))),
            entry("e2", Some(at(2))),
        ];
        assert_eq!(ids(&select_new(&parsed, &HashSet::new())), vec!["e1", "e2", "e3"]);
    }

    #[test]
    fn undated_entries_use_reversed_feed_order() {
        let parsed = vec![entry("e2", None), entry("e1", Some(at(9)))];
        assert_eq!(ids(&select_new(&parsed, &HashSet::new())), vec!["e1", "e2"]);
    }

    #[test]
    fn edited_title_is_not_new() {
        let original = entry("a3", Some(at(0)));
        let mut edited = original.clone();
        edited.title = "a3 (updated)".to_string();

        let seen = seen_set(&[original]);
        assert!(select_new(&[edited], &seen).is_empty());
    }

    #[test]
    fn duplicates_and_anonymous_entries_are_dropped() {
        let anonymous = ParsedEntry {
            guid: None,
            link: String::new(),
            ..entry("x", None)
        };
        let parsed = vec![entry("a3", None), entry("a3", None), anonymous];
        assert_eq!(select_new(&parsed, &HashSet::new()).len(), 1);
    }

    #[test]
    fn empty_parse_has_nothing_new() {
        let seen = seen_set(&[entry("a3", None)]);
        assert!(select_new(&[], &seen).is_empty());
    }

    #[test]
    fn staleness_is_measured_from_first_sighting() {
        let window = Duration::hours(12);
        assert!(is_stale(&entry("old", Some(at(0))), at(13), window));
        assert!(!is_stale(&entry("recent", Some(at(2))), at(13), window));
        assert!(!is_stale(&entry("undated", None), at(13), window));
    }

    #[test]
    fn priming_announces_only_the_newest() {
        let new = vec![entry("e1", Some(at(1))), entry("e2", Some(at(2)))];
        let records = plan_records(&new, at(3), None, true);
        let suppressed: Vec<bool> = records.iter().map(|r| r.suppressed).collect();
        assert_eq!(suppressed, vec![true, false]);
    }

    #[test]
    fn stale_entries_are_recorded_but_suppressed() {
        let new = vec![entry("old", Some(at(0))), entry("fresh", Some(at(20)))];
        let records = plan_records(&new, at(21), Some(Duration::hours(12)), false);
        assert_eq!(records.len(), 2);
        assert!(records[0].suppressed);
        assert!(!records[1].suppressed);
    }
}
