use std::collections::BTreeMap;

use crate::models::ScoreEntry;

/// Raw scores keyed by (student, assignment). Re-entry overwrites.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreLedger {
    entries: BTreeMap<(String, String), Option<f64>>,
}

impl ScoreLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = ScoreEntry>) -> Self {
        let mut ledger = Self::new();
        for entry in entries {
            ledger.record(&entry.student_id, &entry.assignment_id, entry.raw_score);
        }
        ledger
    }

    /// Stores a score (or an explicit absence) and returns what was there before.
    pub fn record(
        &mut self,
        student_id: &str,
        assignment_id: &str,
        raw_score: Option<f64>,
    ) -> Option<Option<f64>> {
        self.entries
            .insert((student_id.to_string(), assignment_id.to_string()), raw_score)
    }

    /// `None` when no entry exists, `Some(None)` for a recorded absence.
    pub fn get(&self, student_id: &str, assignment_id: &str) -> Option<Option<f64>> {
        self.entries
            .get(&(student_id.to_string(), assignment_id.to_string()))
            .copied()
    }

    pub fn entries(&self) -> Vec<ScoreEntry> {
        self.entries
            .iter()
            .map(|((student_id, assignment_id), raw_score)| ScoreEntry {
                student_id: student_id.clone(),
                assignment_id: assignment_id.clone(),
                raw_score: *raw_score,
            })
            .collect()
    }

    pub fn entries_for_student(&self, student_id: &str) -> Vec<ScoreEntry> {
        self.entries
            .range((student_id.to_string(), String::new())..)
            .take_while(|((sid, _), _)| sid == student_id)
            .map(|((sid, assignment_id), raw_score)| ScoreEntry {
                student_id: sid.clone(),
                assignment_id: assignment_id.clone(),
                raw_score: *raw_score,
            })
            .collect()
    }

    pub fn remove_assignment(&mut self, assignment_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(_, aid), _| aid != assignment_id);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_entry_overwrites() {
        let mut ledger = ScoreLedger::new();
        assert_eq!(ledger.record("s1", "hw1", Some(12.0)), None);
        assert_eq!(ledger.record("s1", "hw1", Some(18.0)), Some(Some(12.0)));
        assert_eq!(ledger.get("s1", "hw1"), Some(Some(18.0)));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn absence_differs_from_zero_and_from_no_entry() {
        let mut ledger = ScoreLedger::new();
        ledger.record("s1", "hw1", None);
        ledger.record("s1", "exam", Some(0.0));
        assert_eq!(ledger.get("s1", "hw1"), Some(None));
        assert_eq!(ledger.get("s1", "exam"), Some(Some(0.0)));
        assert_eq!(ledger.get("s1", "quiz"), None);
    }

    #[test]
    fn entries_for_student_only_returns_that_student() {
        let ledger = ScoreLedger::from_entries(vec![
            ScoreEntry::present("s1", "hw1", 10.0),
            ScoreEntry::present("s10", "hw1", 11.0),
            ScoreEntry::present("s2", "hw1", 12.0),
            ScoreEntry::present("s1", "exam", 80.0),
        ]);
        let entries = ledger.entries_for_student("s1");
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.student_id == "s1"));
    }

    #[test]
    fn from_entries_keeps_last_duplicate() {
        let ledger = ScoreLedger::from_entries(vec![
            ScoreEntry::present("s1", "hw1", 10.0),
            ScoreEntry::absent("s1", "hw1"),
        ]);
        assert_eq!(ledger.get("s1", "hw1"), Some(None));
    }

    #[test]
    fn removing_an_assignment_drops_its_entries() {
        let mut ledger = ScoreLedger::from_entries(vec![
            ScoreEntry::present("s1", "hw1", 10.0),
            ScoreEntry::present("s2", "hw1", 12.0),
            ScoreEntry::present("s1", "exam", 80.0),
        ]);
        assert_eq!(ledger.remove_assignment("hw1"), 2);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get("s2", "hw1"), None);
    }
}
