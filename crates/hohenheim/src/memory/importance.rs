//! Importance scoring heuristics
//!
//! Scores are assigned once at creation and nudged afterwards: retrieval
//! reinforces a long-term record, promotion clamps it. With the default
//! promotion threshold only remember-tagged facts and reflections clear the
//! bar on their own.

use super::types::{MemoryRecord, RecordKind};

/// Metadata key set on interaction records whose exchange failed
pub const FAILED_KEY: &str = "failed";

pub const REMEMBER_IMPORTANCE: f32 = 0.9;
pub const REFLECTION_IMPORTANCE: f32 = 0.9;
pub const FACT_IMPORTANCE: f32 = 0.6;
pub const SYSTEM_EVENT_IMPORTANCE: f32 = 0.1;
pub const FAILED_INTERACTION_IMPORTANCE: f32 = 0.15;

const INTERACTION_BASE: f32 = 0.2;
const INTERACTION_LENGTH_BONUS_MAX: f32 = 0.3;
const INTERACTION_LENGTH_SCALE: f32 = 2000.0;

#[derive(Debug, Clone, Copy)]
pub struct ImportanceScorer {
    access_boost: f32,
}

impl Default for ImportanceScorer {
    fn default() -> Self {
        Self { access_boost: 0.02 }
    }
}

impl ImportanceScorer {
    pub fn new(access_boost: f32) -> Self {
        Self {
            access_boost: access_boost.clamp(0.0, 1.0),
        }
    }

    /// Initial importance for a freshly created record
    pub fn score(&self, record: &MemoryRecord) -> f32 {
        if record.is_remember_tagged() {
            return REMEMBER_IMPORTANCE;
        }
        match record.kind {
            RecordKind::Reflection => REFLECTION_IMPORTANCE,
            RecordKind::Fact => FACT_IMPORTANCE,
            RecordKind::SystemEvent => SYSTEM_EVENT_IMPORTANCE,
            RecordKind::Interaction => {
                if record.metadata.contains_key(FAILED_KEY) {
                    return FAILED_INTERACTION_IMPORTANCE;
                }
                let chars = record.content.chars().count() as f32;
                let bonus = (chars / INTERACTION_LENGTH_SCALE).min(INTERACTION_LENGTH_BONUS_MAX);
                INTERACTION_BASE + bonus
            }
        }
    }

    /// Importance after the record was used as context once more
    pub fn reinforce(&self, current: f32) -> f32 {
        (current + self.access_boost).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::REMEMBER_KEY;

    #[test]
    fn test_remember_tag_wins_over_kind() {
        let scorer = ImportanceScorer::default();
        let record = MemoryRecord::new(RecordKind::Interaction, "x").with_metadata(REMEMBER_KEY, true);
        assert_eq!(scorer.score(&record), REMEMBER_IMPORTANCE);
    }

    #[test]
    fn test_interactions_stay_below_default_threshold() {
        let scorer = ImportanceScorer::default();
        let long = MemoryRecord::new(RecordKind::Interaction, "a".repeat(100_000));
        let short = MemoryRecord::new(RecordKind::Interaction, "hi");
        assert!(scorer.score(&long) <= 0.5);
        assert!(scorer.score(&short) >= INTERACTION_BASE);
        assert!(scorer.score(&long) > scorer.score(&short));
    }

    #[test]
    fn test_failed_interaction_scores_low() {
        let scorer = ImportanceScorer::default();
        let record = MemoryRecord::new(RecordKind::Interaction, "q").with_metadata(FAILED_KEY, true);
        assert_eq!(scorer.score(&record), FAILED_INTERACTION_IMPORTANCE);
    }

    #[test]
    fn test_reflection_qualifies_by_default() {
        let scorer = ImportanceScorer::default();
        let record = MemoryRecord::new(RecordKind::Reflection, "I notice...");
        assert!(scorer.score(&record) >= 0.85);
    }

    #[test]
    fn test_reinforce_saturates_at_one() {
        let scorer = ImportanceScorer::new(0.3);
        assert!((scorer.reinforce(0.5) - 0.8).abs() < 1e-6);
        assert_eq!(scorer.reinforce(0.9), 1.0);
    }
}
