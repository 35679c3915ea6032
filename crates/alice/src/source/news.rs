//! Headline data source backed by reddit listings or the NYT API.

use super::weather::fill_template;
use super::{get_json, DataSourceBase, FetchError, Requirements, Source, SourceError};
use crate::types::{short_hash, value_text, SourceClass, SourceId, WantConfig, WantId};
use aliceconf::SourceDefinition;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::info;

pub const FREQUENCY: Duration = Duration::from_secs(300);
pub const DEFAULT_LIMIT: usize = 6;
pub const DEFAULT_WIDTH: usize = 70;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewsBackend {
    Reddit,
    Nyt,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Article {
    pub title: String,
    pub url: String,
    pub source: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Headlines {
    pub count: usize,
    pub articles: Vec<Article>,
}

impl Headlines {
    fn new(articles: Vec<Article>) -> Self {
        Self {
            count: articles.len(),
            articles,
        }
    }
}

#[derive(Debug)]
pub struct NewsSource {
    base: DataSourceBase,
    backend: NewsBackend,
    requirements: Requirements,
    http: reqwest::Client,
}

impl NewsSource {
    pub fn new(def: &SourceDefinition, http: reqwest::Client) -> Result<Self, SourceError> {
        let base = DataSourceBase::from_definition(def, FREQUENCY)?;
        let backend = match base.backend.as_str() {
            "reddit" => NewsBackend::Reddit,
            "nyt" => NewsBackend::Nyt,
            _ => {
                return Err(SourceError::UnknownBackend {
                    source_type: base.source_type,
                    backend: base.backend,
                })
            }
        };
        Ok(Self {
            base,
            backend,
            requirements: Requirements::new(&["limit", "width"]).with_filter("localnews", &["city"]),
            http,
        })
    }

    pub fn backend(&self) -> NewsBackend {
        self.backend
    }
}

/// Cut a long title at the first space at or after `width - 3` and mark it.
/// Titles with no such space are left whole.
pub fn truncate_title(title: &str, width: usize) -> String {
    if title.chars().count() <= width {
        return title.to_string();
    }
    let from = width.saturating_sub(3);
    match title
        .char_indices()
        .enumerate()
        .find(|(pos, (_, ch))| *pos >= from && *ch == ' ')
    {
        Some((_, (byte, _))) => format!("{}...", &title[..byte]),
        None => title.to_string(),
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn str_field(obj: &Value, key: &str) -> String {
    obj.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

/// Headlines from a reddit listing (`data.children[].data` of kind `t3`).
pub fn parse_reddit(body: &Value, limit: usize, width: usize) -> Result<Headlines, FetchError> {
    let children = body
        .pointer("/data/children")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Malformed("no data.children in listing".to_string()))?;

    let articles = children
        .iter()
        .filter(|child| child.get("kind").and_then(Value::as_str) == Some("t3"))
        .filter_map(|child| child.get("data"))
        .take(limit)
        .map(|data| Article {
            title: truncate_title(&decode_entities(&str_field(data, "title")), width),
            url: str_field(data, "url"),
            source: str_field(data, "domain"),
            id: str_field(data, "name"),
            author: data.get("author").and_then(Value::as_str).map(str::to_string),
        })
        .collect();

    Ok(Headlines::new(articles))
}

/// Headlines from an NYT top-stories response (`results[]` of type Article).
pub fn parse_nyt(body: &Value, limit: usize, width: usize) -> Result<Headlines, FetchError> {
    let results = body
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Malformed("no results in response".to_string()))?;

    let articles = results
        .iter()
        .filter(|r| r.get("item_type").and_then(Value::as_str) == Some("Article"))
        .take(limit)
        .map(|r| {
            let url = str_field(r, "url");
            Article {
                title: truncate_title(&str_field(r, "title"), width),
                id: short_hash(&[url.as_str()]),
                url,
                source: str_field(r, "source"),
                author: None,
            }
        })
        .collect();

    Ok(Headlines::new(articles))
}

fn usize_setting(config: &Map<String, Value>, key: &str, default: usize) -> usize {
    config
        .get(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .map(|n| n as usize)
        .unwrap_or(default)
}

#[async_trait]
impl Source for NewsSource {
    fn class(&self) -> SourceClass {
        SourceClass::Data
    }

    fn source_type(&self) -> &str {
        &self.base.source_type
    }

    fn id(&self) -> &SourceId {
        &self.base.id
    }

    fn satisfies(&self) -> &[String] {
        &self.base.satisfies
    }

    fn frequency(&self) -> Duration {
        self.base.frequency
    }

    fn required_fields(&self, filter: &str) -> Vec<String> {
        self.requirements.fields_for(filter)
    }

    fn build_want_id(&self, filter: &str, config: &WantConfig) -> WantId {
        match filter {
            "worldnews" => self.base.want_id(filter, "global"),
            _ => {
                let city = value_text(config.get("city"));
                self.base.want_id(filter, &short_hash(&[city.as_str()]))
            }
        }
    }

    async fn fetch(&self, filter: &str, config: &WantConfig) -> Result<Value, FetchError> {
        let mut unified = self.base.definition.configuration.clone();
        for (k, v) in config {
            unified.insert(k.clone(), v.clone());
        }

        let host = unified
            .get("host")
            .and_then(Value::as_str)
            .ok_or_else(|| FetchError::MissingSetting("host".to_string()))?;
        let path = self
            .base
            .definition
            .filter_setting(filter, "path")
            .ok_or_else(|| FetchError::UnsupportedFilter(filter.to_string()))?;
        let path = fill_template(path, &[("city", value_text(unified.get("city")))]);
        let limit = usize_setting(&unified, "limit", DEFAULT_LIMIT);
        let width = usize_setting(&unified, "width", DEFAULT_WIDTH);
        let url = format!("{}{}", host.trim_end_matches('/'), path);

        info!(source.id = %self.base.id, filter, "requesting updated news data");

        let headlines = match self.backend {
            NewsBackend::Reddit => {
                let body = get_json(self.http.get(&url)).await?;
                parse_reddit(&body, limit, width)?
            }
            NewsBackend::Nyt => {
                let key = unified
                    .get("key")
                    .and_then(Value::as_str)
                    .ok_or_else(|| FetchError::MissingSetting("key".to_string()))?;
                let mut query: Vec<(String, String)> = self
                    .base
                    .definition
                    .configuration
                    .get("filters")
                    .and_then(|f| f.get(filter))
                    .and_then(|f| f.get("arguments"))
                    .and_then(Value::as_object)
                    .map(|args| {
                        args.iter()
                            .map(|(k, v)| (k.clone(), value_text(Some(v))))
                            .collect()
                    })
                    .unwrap_or_default();
                query.push(("api-key".to_string(), key.to_string()));
                let body = get_json(self.http.get(&url).query(&query)).await?;
                parse_nyt(&body, limit, width)?
            }
        };

        serde_json::to_value(headlines).map_err(|e| FetchError::Malformed(e.to_string()))
    }
}
