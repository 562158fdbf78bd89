//! Memory subsystem
//!
//! Short-term memory is per session and bounded; long-term memory is shared
//! and persistent. The coordinator owns the policy between them.

pub mod coordinator;
pub mod importance;
pub mod long_term;
pub mod short_term;
pub mod types;

pub use coordinator::{
    AssembledContext, ContextEntry, ContextSource, MemoryCoordinator, PromotionOutcome,
    RecordOutcome,
};
pub use importance::ImportanceScorer;
pub use long_term::{LongTermMemory, ScoredRecord};
pub use short_term::{ShortTermMemory, ShortTermStats};
pub use types::{MemoryRecord, Metadata, MetadataValue, RecordId, RecordKind};
