//! Category index: the corpus partitioned by category code.
//!
//! Building the index is where declaration errors surface. A record whose
//! code was never declared, a code declared twice, a code that is not a
//! single character usable as a directory name, or a declared category with no records all abort the
//! run with a `ConfigError` before anything touches the output directory.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use crate::error::{GenerateError, GenerateResult};
use crate::models::{Corpus, SentenceRecord};

/// Records of one category, in corpus order.
#[derive(Debug, Clone)]
pub struct CategoryEntry {
    pub code: String,
    pub name: String,
    pub records: Vec<SentenceRecord>,
}

/// Code → entry, iterated in ascending code order.
#[derive(Debug, Clone, Default)]
pub struct CategoryIndex {
    entries: BTreeMap<String, CategoryEntry>,
}

impl CategoryIndex {
    pub fn build(corpus: &Corpus) -> GenerateResult<Self> {
        if corpus.sentences.is_empty() {
            return Err(GenerateError::config("corpus contains no sentences"));
        }

        let mut entries = BTreeMap::new();
        for decl in &corpus.categories {
            if let Err(problem) = check_code(&decl.key) {
                return Err(GenerateError::config_in(
                    &decl.key,
                    format!("category code {:?} {}", decl.key, problem),
                ));
            }
            let entry = CategoryEntry {
                code: decl.key.clone(),
                name: decl.name.clone(),
                records: Vec::new(),
            };
            if entries.insert(decl.key.clone(), entry).is_some() {
                return Err(GenerateError::config_in(
                    &decl.key,
                    format!("category code '{}' is declared more than once", decl.key),
                ));
            }
        }

        for (pos, record) in corpus.sentences.iter().enumerate() {
            let entry = entries.get_mut(&record.category).ok_or_else(|| {
                GenerateError::config_in(
                    &record.category,
                    format!(
                        "sentence #{} references undeclared category code '{}'",
                        pos, record.category
                    ),
                )
            })?;
            entry.records.push(record.clone());
        }

        if let Some(empty) = entries.values().find(|e| e.records.is_empty()) {
            return Err(GenerateError::config_in(
                &empty.code,
                format!("category '{}' ({}) has no sentences", empty.code, empty.name),
            ));
        }

        Ok(Self { entries })
    }

    pub fn get(&self, code: &str) -> Option<&CategoryEntry> {
        self.entries.get(code)
    }

    /// Entries in ascending code order.
    pub fn iter(&self) -> impl Iterator<Item = &CategoryEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A code is one character that works as a single path segment and as a
/// field in the tab-separated rules manifest.
fn check_code(code: &str) -> Result<(), &'static str> {
    let mut chars = code.chars();
    let c = match (chars.next(), chars.next()) {
        (Some(c), None) => c,
        _ => return Err("must be exactly one character"),
    };
    if c.is_whitespace() || c.is_control() {
        return Err("must not be whitespace or a control character");
    }
    let mut components = Path::new(code).components();
    let plain = matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none();
    if !plain || c == '\\' {
        return Err("is not usable as a directory name");
    }
    Ok(())
}
