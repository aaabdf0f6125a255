use serde::Serialize;

/// What happened to a single highlight during a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighlightOutcome {
    Appended,
    Updated,
    Unchanged,
}

impl HighlightOutcome {
    pub fn record(self, stats: &mut SyncStats) {
        match self {
            HighlightOutcome::Appended => stats.appended += 1,
            HighlightOutcome::Updated => stats.updated += 1,
            HighlightOutcome::Unchanged => stats.unchanged += 1,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub appended: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl SyncStats {
    pub fn mutations(&self) -> usize {
        self.appended + self.updated
    }
}

pub fn is_unchanged(stored_token: Option<&str>, live_token: &str) -> bool {
    stored_token == Some(live_token)
}

/// Progress message with a completion percentage.
pub fn progress_line(verb: &str, done: usize, total: usize) -> String {
    let percent = if total == 0 { 100 } else { done * 100 / total };
    format!("{verb}... {done}/{total} ({percent}%)")
}

pub fn log_ledger_error(action: &str, source_key: &str, item_id: &str, e: impl std::fmt::Display) {
    tracing::warn!("failed to {} for {}:{}: {}", action, source_key, item_id, e);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_accumulate() {
        let mut stats = SyncStats::default();
        HighlightOutcome::Appended.record(&mut stats);
        HighlightOutcome::Updated.record(&mut stats);
        HighlightOutcome::Unchanged.record(&mut stats);
        HighlightOutcome::Unchanged.record(&mut stats);
        assert_eq!(stats, SyncStats { appended: 1, updated: 1, unchanged: 2 });
        assert_eq!(stats.mutations(), 2);
    }

    #[test]
    fn test_progress_line() {
        assert_eq!(progress_line("Syncing", 5, 20), "Syncing... 5/20 (25%)");
        assert_eq!(progress_line("Syncing", 0, 0), "Syncing... 0/0 (100%)");
    }

    #[test]
    fn test_is_unchanged() {
        assert!(is_unchanged(Some("abc"), "abc"));
        assert!(!is_unchanged(None, "abc"));
        assert!(!is_unchanged(Some("abd"), "abc"));
    }
}
