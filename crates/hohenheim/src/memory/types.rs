//! Record types shared by the short-term and long-term stores
//!
//! A [`MemoryRecord`] is created once, lives in short-term memory, and may be
//! promoted to long-term memory, gaining an embedding on the way.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata key marking a record the user explicitly asked to keep
pub const REMEMBER_KEY: &str = "remember";
/// Metadata key naming where a record came from
pub const SOURCE_KEY: &str = "source";

static LAST_TIMESTAMP_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Next creation timestamp. Strictly increasing across the process, even
/// when the wall clock stalls or steps backwards.
pub fn next_timestamp() -> DateTime<Utc> {
    let now = Utc::now().timestamp_micros();
    let mut last = LAST_TIMESTAMP_MICROS.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last.saturating_add(1));
        match LAST_TIMESTAMP_MICROS.compare_exchange_weak(
            last,
            candidate,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return DateTime::from_timestamp_micros(candidate).unwrap_or_else(Utc::now),
            Err(actual) => last = actual,
        }
    }
}

/// Opaque record identifier, unique across both stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for RecordId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// What a record describes. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    /// A query and its outcome
    Interaction,
    /// Something the user stated or asked to keep
    Fact,
    /// Output of a self-reflection pass
    Reflection,
    /// Mode toggles, session lifecycle and similar bookkeeping
    SystemEvent,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Interaction,
        RecordKind::Fact,
        RecordKind::Reflection,
        RecordKind::SystemEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Interaction => "interaction",
            RecordKind::Fact => "fact",
            RecordKind::Reflection => "reflection",
            RecordKind::SystemEvent => "system-event",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown record kind: {s}"))
    }
}

/// Scalar metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl MetadataValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Number(n) => write!(f, "{n}"),
            MetadataValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Number(value)
    }
}

impl From<usize> for MetadataValue {
    fn from(value: usize) -> Self {
        MetadataValue::Number(value as f64)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// A single unit of memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: RecordId,
    pub kind: RecordKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Salience in [0, 1]
    pub importance: f32,
    #[serde(default)]
    pub metadata: Metadata,
    /// Present only once the record has been promoted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl MemoryRecord {
    /// Create a record with a fresh id and timestamp and zero importance
    pub fn new(kind: RecordKind, content: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(),
            kind,
            content: content.into(),
            timestamp: next_timestamp(),
            importance: 0.0,
            metadata: Metadata::new(),
            embedding: None,
        }
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.set_importance(importance);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Update the importance, clamped to [0, 1]
    pub fn set_importance(&mut self, importance: f32) {
        self.importance = if importance.is_nan() {
            0.0
        } else {
            importance.clamp(0.0, 1.0)
        };
    }

    /// Whether the user explicitly asked for this record to be kept
    pub fn is_remember_tagged(&self) -> bool {
        matches!(
            self.metadata.get(REMEMBER_KEY),
            Some(MetadataValue::Bool(true))
        )
    }

    /// Case-insensitive substring match over content and metadata values
    pub fn matches_text(&self, needle_lower: &str) -> bool {
        self.content.to_lowercase().contains(needle_lower)
            || self
                .metadata
                .values()
                .any(|v| v.to_string().to_lowercase().contains(needle_lower))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serialization() {
        let record = MemoryRecord::new(RecordKind::SystemEvent, "mode toggled")
            .with_importance(0.4)
            .with_metadata(SOURCE_KEY, "router")
            .with_metadata("turn", 3usize);

        let json = serde_json::to_string(&record).expect("Failed to serialize record");
        assert!(json.contains("\"system-event\""));
        assert!(!json.contains("embedding"));

        let back: MemoryRecord = serde_json::from_str(&json).expect("Failed to deserialize");
        assert_eq!(back, record);
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let records: Vec<_> = (0..200)
            .map(|i| MemoryRecord::new(RecordKind::Interaction, format!("r{i}")))
            .collect();
        for pair in records.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let a = MemoryRecord::new(RecordKind::Fact, "same");
        let b = MemoryRecord::new(RecordKind::Fact, "same");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_set_importance_clamps() {
        let mut record = MemoryRecord::new(RecordKind::Fact, "x");
        record.set_importance(1.7);
        assert_eq!(record.importance, 1.0);
        record.set_importance(-0.2);
        assert_eq!(record.importance, 0.0);
        record.set_importance(f32::NAN);
        assert_eq!(record.importance, 0.0);
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in RecordKind::ALL {
            assert_eq!(kind.as_str().parse::<RecordKind>(), Ok(kind));
        }
        assert!("episodic".parse::<RecordKind>().is_err());
    }

    #[test]
    fn test_remember_tag() {
        let plain = MemoryRecord::new(RecordKind::Fact, "sky is blue");
        assert!(!plain.is_remember_tagged());
        let tagged = plain.with_metadata(REMEMBER_KEY, true);
        assert!(tagged.is_remember_tagged());
    }

    #[test]
    fn test_matches_text_checks_metadata() {
        let record = MemoryRecord::new(RecordKind::Interaction, "Hello There")
            .with_metadata(SOURCE_KEY, "Telegram");
        assert!(record.matches_text("hello"));
        assert!(record.matches_text("telegram"));
        assert!(!record.matches_text("discord"));
    }
}
