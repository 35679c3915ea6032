//! In-process data source for engine tests.

use super::{FetchError, Source};
use crate::types::{short_hash, value_text, SourceClass, SourceId, WantConfig, WantId};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug)]
pub struct CountingSource {
    id: SourceId,
    source_type: String,
    satisfies: Vec<String>,
    frequency: Duration,
    required: Vec<String>,
    fetches: AtomicUsize,
    failing: AtomicBool,
}

impl CountingSource {
    pub fn new(source_type: &str, id: &str, satisfies: &[&str], frequency: Duration) -> Self {
        Self {
            id: SourceId::new(id),
            source_type: source_type.to_string(),
            satisfies: satisfies.iter().map(|s| s.to_string()).collect(),
            frequency,
            required: Vec::new(),
            fetches: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn requiring(mut self, fields: &[&str]) -> Self {
        self.required = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Source for CountingSource {
    fn class(&self) -> SourceClass {
        SourceClass::Data
    }

    fn source_type(&self) -> &str {
        &self.source_type
    }

    fn id(&self) -> &SourceId {
        &self.id
    }

    fn satisfies(&self) -> &[String] {
        &self.satisfies
    }

    fn frequency(&self) -> Duration {
        self.frequency
    }

    fn required_fields(&self, _filter: &str) -> Vec<String> {
        self.required.clone()
    }

    fn build_want_id(&self, filter: &str, config: &WantConfig) -> WantId {
        let suffix = match config.get("city") {
            Some(city) => short_hash(&[value_text(Some(city)).as_str()]),
            None => "global".to_string(),
        };
        WantId::new(format!("data:{}/{}-{}", self.source_type, filter, suffix))
    }

    async fn fetch(&self, filter: &str, _config: &WantConfig) -> Result<Value, FetchError> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Status(503));
        }
        Ok(json!({"filter": filter, "fetch": n}))
    }
}
