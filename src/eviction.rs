// Victim selection under memory pressure.
use crate::accountant::AccessRecord;
use crate::query::CacheKind;

/// Pick up to `target` keys to evict, oldest-idle first.
///
/// Approximate LRU: access times are updated per operation, not per byte, so
/// ordering is coarse. Equal timestamps are broken by an explicit kind
/// priority (recomputable kinds before the expensive full fund list), then by
/// key for determinism. Favorites are excluded before selection; when `target`
/// exceeds the remaining candidates, all of them are returned.
pub fn select_victims(records: &[AccessRecord], target: usize) -> Vec<String> {
    if target == 0 {
        return Vec::new();
    }

    let mut candidates: Vec<&AccessRecord> = records
        .iter()
        .filter(|record| record.kind != CacheKind::Favorites)
        .filter(|record| !record.key.starts_with(CacheKind::Favorites.prefix()))
        .collect();

    candidates.sort_by(|a, b| {
        a.last_accessed_at
            .cmp(&b.last_accessed_at)
            .then_with(|| a.kind.eviction_priority().cmp(&b.kind.eviction_priority()))
            .then_with(|| a.key.cmp(&b.key))
    });

    candidates
        .into_iter()
        .take(target)
        .map(|record| record.key.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{ Duration, Utc };

    fn record(key: &str, kind: CacheKind, age_secs: i64) -> AccessRecord {
        AccessRecord {
            key: key.to_string(),
            kind,
            last_accessed_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[test]
    fn test_oldest_idle_first() {
        let records = vec![
            record("filtered:recent", CacheKind::FilteredList, 10),
            record("filtered:old", CacheKind::FilteredList, 300),
            record("filtered:ancient", CacheKind::FilteredList, 900),
        ];

        let victims = select_victims(&records, 2);
        assert_eq!(victims, vec!["filtered:ancient".to_string(), "filtered:old".to_string()]);
    }

    #[test]
    fn test_favorites_are_never_selected() {
        let records = vec![
            record("favorites:ids", CacheKind::Favorites, 10_000),
            record("filtered:a", CacheKind::FilteredList, 10),
        ];

        let victims = select_victims(&records, 5);
        assert_eq!(victims, vec!["filtered:a".to_string()]);
    }

    #[test]
    fn test_tie_break_prefers_recomputable_kinds() {
        let at = Utc::now();
        let records = vec![
            AccessRecord { key: "fund_list:all".to_string(), kind: CacheKind::FundList, last_accessed_at: at },
            AccessRecord { key: "ranking:top".to_string(), kind: CacheKind::Ranking, last_accessed_at: at },
            AccessRecord { key: "filtered:x".to_string(), kind: CacheKind::FilteredList, last_accessed_at: at },
        ];

        let victims = select_victims(&records, 2);
        assert_eq!(victims, vec!["filtered:x".to_string(), "ranking:top".to_string()]);
    }

    #[test]
    fn test_target_exceeding_candidates_returns_all() {
        let records = vec![record("filtered:a", CacheKind::FilteredList, 10)];
        let victims = select_victims(&records, 100);
        assert_eq!(victims.len(), 1);
    }

    #[test]
    fn test_zero_target_selects_nothing() {
        let records = vec![record("filtered:a", CacheKind::FilteredList, 10)];
        assert!(select_victims(&records, 0).is_empty());
    }
}
