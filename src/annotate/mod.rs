//! Natural-language annotations produced by an external analysis service.
//!
//! The service is called after a build is compared and may answer inline or
//! later through a callback carrying the same payload shape. Annotation items
//! are keyed by `id`; repeated ids are merged rather than duplicated.

pub mod client;

pub use client::{AnnotationClient, AnnotationError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Separator between merged values of one text field.
const UNION_SEPARATOR: &str = " | ";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationItem {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    /// Any other fields the analysis service attaches.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl AnnotationItem {
    pub fn new(id: &str, kind: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: kind.to_string(),
            description: description.to_string(),
            extra: BTreeMap::new(),
        }
    }

    /// Fold another item with the same id into this one. String fields become
    /// the union of both values; for anything else the existing value wins.
    pub fn absorb(&mut self, other: AnnotationItem) {
        self.kind = union_text(&self.kind, &other.kind);
        self.description = union_text(&self.description, &other.description);
        for (key, value) in other.extra {
            match (self.extra.get_mut(&key), value) {
                (Some(Value::String(current)), Value::String(incoming)) => {
                    *current = union_text(current, &incoming);
                }
                (Some(_), _) => {}
                (None, value) => {
                    self.extra.insert(key, value);
                }
            }
        }
    }

    /// Overwrite fields from a key/value patch. `id` is immutable.
    pub fn apply_updates(&mut self, updates: &Map<String, Value>) -> Result<(), String> {
        for (key, value) in updates {
            match key.as_str() {
                "id" => return Err("annotation id cannot be changed".to_string()),
                "type" => self.kind = expect_string(key, value)?,
                "description" => self.description = expect_string(key, value)?,
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }
}

fn expect_string(key: &str, value: &Value) -> Result<String, String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| format!("field '{}' must be a string", key))
}

fn union_text(current: &str, incoming: &str) -> String {
    if incoming.is_empty() || current.split(UNION_SEPARATOR).any(|part| part == incoming) {
        return current.to_string();
    }
    if current.is_empty() {
        return incoming.to_string();
    }
    format!("{}{}{}", current, UNION_SEPARATOR, incoming)
}

/// Merge `incoming` into `existing`, keeping first-seen order of ids.
pub fn merge_items(existing: Vec<AnnotationItem>, incoming: Vec<AnnotationItem>) -> Vec<AnnotationItem> {
    let mut merged: Vec<AnnotationItem> = Vec::with_capacity(existing.len() + incoming.len());
    for item in existing.into_iter().chain(incoming) {
        match merged.iter_mut().find(|m| m.id == item.id) {
            Some(current) => current.absorb(item),
            None => merged.push(item),
        }
    }
    merged
}

/// Stored annotations for one screen of one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAnnotation {
    pub project_id: String,
    pub build_id: String,
    pub image_name: String,
    pub reference_url: Option<String>,
    pub screenshot_url: Option<String>,
    pub items: Vec<AnnotationItem>,
    pub updated_at: i64,
}

/// Payload the analysis service posts back (or returns inline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationPayload {
    #[serde(rename = "projectId")]
    pub project_id: String,
    #[serde(rename = "buildId")]
    pub build_id: String,
    #[serde(rename = "projectType", default, skip_serializing_if = "Option::is_none")]
    pub project_type: Option<String>,
    pub data: Vec<AnnotationData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationData {
    #[serde(rename = "imageName")]
    pub image_name: String,
    #[serde(default)]
    pub reference_url: Option<String>,
    #[serde(default)]
    pub screenshot_url: Option<String>,
    #[serde(default)]
    pub analysis: Vec<AnnotationItem>,
}
