//! Identifier newtypes shared across the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub use aliceproto::SourceClass;

/// Settings a Want carries to its source: connector config merged with
/// client settings.
pub type WantConfig = serde_json::Map<String, serde_json::Value>;

/// Identity of a registered source, unique within its class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deduplication key for a Want.
///
/// Resolved ids look like `data:weather/geo-1a2b3c4d5e6f7a8b`. Before a want
/// is bound to a source it reports a placeholder `weather/geo-pending`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WantId(String);

impl WantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn pending(source_type: &str, filter: &str) -> Self {
        Self(format!("{source_type}/{filter}-pending"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Placeholder ids never contain the class separator.
    pub fn is_pending(&self) -> bool {
        !self.0.contains(':')
    }

    /// Bus topic carrying this want's events.
    pub fn topic(&self) -> String {
        format!("dataevent-{}", self.0)
    }
}

impl fmt::Display for WantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

static NEXT_WANT_UID: AtomicU64 = AtomicU64::new(1);

/// Per-instance identity of a Want, used to key the pending queue.
///
/// Strictly increasing, so ordering by uid is queue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WantUid(u64);

impl WantUid {
    pub fn generate() -> Self {
        Self(NEXT_WANT_UID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WantUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "want-{}", self.0)
    }
}

/// First 16 hex chars of a BLAKE3 digest over `parts` joined by commas.
pub fn short_hash(parts: &[&str]) -> String {
    let joined = parts.join(",");
    let digest = blake3::hash(joined.as_bytes());
    digest.to_hex()[..16].to_string()
}

/// Render a config value the way it appears inside an id: strings bare,
/// everything else as JSON, missing as empty.
pub fn value_text(value: Option<&serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
