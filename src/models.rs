//! Core data models shared by the loader, the writer and the manifests.
//!
//! Records are treated as opaque payloads: the only field the generator
//! interprets is the category code (`type`). Unknown fields survive a
//! load/write cycle unchanged, in sorted key order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Name of the address space covering the whole corpus.
pub const GLOBAL_SPACE: &str = "global";

/// One quotation as read from the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub hitokoto: String,
    /// Category code.
    #[serde(rename = "type")]
    pub category: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub from_who: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A declared category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDecl {
    #[serde(alias = "code")]
    pub key: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    /// Bundle-relative path of this category's sentence file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Everything the generator reads: declarations plus records in source order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Corpus {
    pub categories: Vec<CategoryDecl>,
    pub sentences: Vec<SentenceRecord>,
}

/// Which partition of the corpus an address space covers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SpaceKind {
    Global,
    Category { code: String },
}

impl SpaceKind {
    /// Space name as used in manifests and errors.
    pub fn name(&self) -> &str {
        match self {
            SpaceKind::Global => GLOBAL_SPACE,
            SpaceKind::Category { code } => code,
        }
    }
}
