//! Rule and category manifests.
//!
//! `rules.txt` tells operators which substring length each edge rewrite
//! rule must use; `categories.json` lists the valid category codes for
//! clients. Both are written only after every space has been published,
//! and only if the tree on disk matches what they describe.
//!
//! # `rules.txt`
//!
//! Lines starting with `#` are comments. Every space has one tab-separated
//! data line followed by comment lines carrying the rendered rule:
//!
//! ```text
//! global	orig_data	2	187	256	3f1c…
//! #   rewrite: concat("/orig_data/", substring(uuidv4(cf.random_seed), 0, 2), ".json")
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::Config;
use crate::error::{GenerateError, GenerateResult};
use crate::index::CategoryIndex;
use crate::models::GLOBAL_SPACE;
use crate::writer::StagedSpace;

pub const RULES_FILE: &str = "rules.txt";
pub const CATEGORIES_MANIFEST: &str = "categories.json";

/// One data line of `rules.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEntry {
    pub space: String,
    pub path: String,
    pub width: u32,
    pub count: usize,
    pub capacity: usize,
    pub digest: String,
}

/// One element of `categories.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryManifestEntry {
    pub code: String,
    pub name: String,
    pub count: usize,
    pub width: u32,
}

impl RuleEntry {
    fn from_staged(staged: &StagedSpace) -> Self {
        let space = &staged.plan.space;
        RuleEntry {
            space: space.name.clone(),
            path: staged.path.clone(),
            width: space.width,
            count: space.item_count,
            capacity: space.capacity,
            digest: staged.digest.clone(),
        }
    }

    /// Edge rewrite expression for this space.
    pub fn rewrite_expr(&self, config: &Config) -> String {
        format!(
            "concat(\"{}/{}/\", substring({}, 0, {}), \".{}\")",
            config.rules.url_prefix.trim_end_matches('/'),
            self.path,
            config.rules.random_expr,
            self.width,
            config.output.extension
        )
    }

    /// Request path the match expression routes to this space.
    pub fn route(&self) -> String {
        if self.space == GLOBAL_SPACE {
            "/".to_string()
        } else {
            format!("/{}", self.space)
        }
    }
}

/// Global first, then category codes ascending.
fn sort_key(space: &str) -> (u8, &str) {
    if space == GLOBAL_SPACE {
        (0, space)
    } else {
        (1, space)
    }
}

pub fn render_rules(entries: &[RuleEntry], config: &Config) -> String {
    let mut out = String::new();
    out.push_str("# quote-shards rule manifest\n");
    out.push_str("# space\tpath\twidth\tcount\tcapacity\tsha256\n");
    out.push_str("# Each rule takes the first `width` characters of a random id as the shard name.\n");

    for entry in entries {
        out.push('\n');
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\n",
            entry.space, entry.path, entry.width, entry.count, entry.capacity, entry.digest
        ));
        out.push_str(&format!("#   rewrite: {}\n", entry.rewrite_expr(config)));
        if let Some(host) = &config.rules.host {
            out.push_str(&format!(
                "#   match:   (http.host eq \"{}\" and http.request.uri.path eq \"{}\")\n",
                host,
                entry.route()
            ));
        }
    }
    out
}

pub fn parse_rules(text: &str) -> Result<Vec<RuleEntry>> {
    let mut entries = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 6 {
            bail!(
                "{} line {}: expected 6 tab-separated fields, found {}",
                RULES_FILE,
                lineno + 1,
                fields.len()
            );
        }
        let num = |i: usize, what: &str| -> Result<usize> {
            fields[i]
                .parse::<usize>()
                .with_context(|| format!("{} line {}: bad {}", RULES_FILE, lineno + 1, what))
        };
        entries.push(RuleEntry {
            space: fields[0].to_string(),
            path: fields[1].to_string(),
            width: num(2, "width")? as u32,
            count: num(3, "count")?,
            capacity: num(4, "capacity")?,
            digest: fields[5].to_string(),
        });
    }
    Ok(entries)
}

/// Read `rules.txt` from a previous run, if there is one.
pub fn read_rules(output: &Path) -> Result<Option<Vec<RuleEntry>>> {
    let path = output.join(RULES_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_rules(&text).map(Some)
}

pub fn read_categories(output: &Path) -> Result<Vec<CategoryManifestEntry>> {
    let path = output.join(CATEGORIES_MANIFEST);
    let bytes =
        std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Category manifest entries, ascending by code.
pub fn category_entries(
    index: &CategoryIndex,
    published: &[StagedSpace],
) -> GenerateResult<Vec<CategoryManifestEntry>> {
    index
        .iter()
        .map(|entry| {
            let staged = published
                .iter()
                .find(|s| s.plan.space.name == entry.code)
                .ok_or_else(|| {
                    GenerateError::ManifestConsistency(format!(
                        "category `{}` has no published space",
                        entry.code
                    ))
                })?;
            Ok(CategoryManifestEntry {
                code: entry.code.clone(),
                name: entry.name.clone(),
                count: entry.records.len(),
                width: staged.plan.space.width,
            })
        })
        .collect()
}

/// Write `rules.txt` and `categories.json` for a finished run.
///
/// `expected` names every space the run planned. Fails with
/// `ManifestConsistencyError` if any of them was not published or if a
/// published directory does not hold exactly `capacity` entries.
pub fn emit_manifests(
    output: &Path,
    config: &Config,
    expected: &[String],
    published: &[StagedSpace],
    index: &CategoryIndex,
) -> GenerateResult<()> {
    for name in expected {
        if !published.iter().any(|s| &s.plan.space.name == name) {
            return Err(GenerateError::ManifestConsistency(format!(
                "space `{}` was planned but not published",
                name
            )));
        }
    }

    for staged in published {
        let dir = output.join(&staged.path);
        let files = std::fs::read_dir(&dir)
            .map(|rd| rd.count())
            .map_err(|e| GenerateError::io(&staged.plan.space.name, format!("list {}", dir.display()), e))?;
        if files != staged.plan.space.capacity {
            return Err(GenerateError::ManifestConsistency(format!(
                "space `{}` has {} files in {}, expected {}",
                staged.plan.space.name,
                files,
                staged.path,
                staged.plan.space.capacity
            )));
        }
    }

    let mut entries: Vec<RuleEntry> = published.iter().map(RuleEntry::from_staged).collect();
    entries.sort_by(|a, b| sort_key(&a.space).cmp(&sort_key(&b.space)));

    let categories = category_entries(index, published)?;
    let mut categories_json = serde_json::to_vec_pretty(&categories)
        .map_err(|e| GenerateError::io(GLOBAL_SPACE, "serialize categories", e.into()))?;
    categories_json.push(b'\n');

    write_atomic(output, RULES_FILE, render_rules(&entries, config).as_bytes())?;
    write_atomic(output, CATEGORIES_MANIFEST, &categories_json)?;

    tracing::info!(spaces = entries.len(), "wrote manifests");
    Ok(())
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> GenerateResult<()> {
    let tmp = dir.join(format!(".{}.tmp", name));
    let dest = dir.join(name);
    std::fs::write(&tmp, bytes)
        .and_then(|_| std::fs::rename(&tmp, &dest))
        .map_err(|e| GenerateError::io(name, format!("write {}", dest.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CategoryDecl, Corpus, SentenceRecord};
    use quote_shards_core::{plan_space, PlanLimits};
    use tempfile::TempDir;

    fn entry(space: &str, path: &str, width: u32, count: usize) -> RuleEntry {
        RuleEntry {
            space: space.to_string(),
            path: path.to_string(),
            width,
            count,
            capacity: 16usize.pow(width),
            digest: "00ff".to_string(),
        }
    }

    #[test]
    fn test_rules_round_trip() {
        let cfg = Config::default();
        let entries = vec![
            entry("global", "orig_data", 2, 40),
            entry("a", "categories/a", 1, 10),
        ];
        let text = render_rules(&entries, &cfg);
        assert_eq!(parse_rules(&text).unwrap(), entries);
    }

    #[test]
    fn test_rewrite_expression() {
        let mut cfg = Config::default();
        let e = entry("a", "categories/a", 2, 40);
        assert_eq!(
            e.rewrite_expr(&cfg),
            "concat(\"/categories/a/\", substring(uuidv4(cf.random_seed), 0, 2), \".json\")"
        );

        cfg.rules.url_prefix = "https://cdn.example.org/q/".to_string();
        cfg.rules.host = Some("quotes.example.org".to_string());
        assert!(e
            .rewrite_expr(&cfg)
            .starts_with("concat(\"https://cdn.example.org/q/categories/a/\""));

        let text = render_rules(&[e], &cfg);
        assert!(text.contains(
            "(http.host eq \"quotes.example.org\" and http.request.uri.path eq \"/a\")"
        ));
    }

    #[test]
    fn test_global_sorts_first() {
        let mut names = vec!["b", "global", "a"];
        names.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
        assert_eq!(names, vec!["global", "a", "b"]);
    }

    #[test]
    fn test_parse_rejects_short_line() {
        let err = parse_rules("global\torig_data\t1\n").unwrap_err();
        assert!(err.to_string().contains("6 tab-separated"));
    }

    fn corpus(codes: &[(&str, usize)]) -> Corpus {
        let mut corpus = Corpus::default();
        for (code, n) in codes {
            corpus.categories.push(CategoryDecl {
                key: code.to_string(),
                name: code.to_uppercase(),
                desc: None,
                path: None,
            });
            for i in 0..*n {
                corpus.sentences.push(SentenceRecord {
                    id: None,
                    uuid: None,
                    hitokoto: format!("{code}{i}"),
                    category: code.to_string(),
                    from: None,
                    from_who: None,
                    creator: None,
                    extra: Default::default(),
                });
            }
        }
        corpus
    }

    /// A space whose directory holds `files` placeholder shards.
    fn published(out: &Path, name: &str, path: &str, count: usize, files: usize) -> StagedSpace {
        let plan = plan_space(name, count, &PlanLimits::default()).unwrap();
        let dir = out.join(path);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..files {
            std::fs::write(dir.join(format!("{i:03}.json")), "{}").unwrap();
        }
        StagedSpace {
            plan,
            path: path.to_string(),
            staged_dir: out.join(".staging").join(path),
            digest: "00ff".to_string(),
        }
    }

    #[test]
    fn test_emit_writes_both_manifests() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path();
        let index = CategoryIndex::build(&corpus(&[("a", 3)])).unwrap();
        let spaces = vec![
            published(out, "a", "categories/a", 3, 16),
            published(out, "global", "orig_data", 3, 16),
        ];
        let expected = vec!["global".to_string(), "a".to_string()];

        emit_manifests(out, &Config::default(), &expected, &spaces, &index).unwrap();

        let rules = read_rules(out).unwrap().unwrap();
        let names: Vec<&str> = rules.iter().map(|r| r.space.as_str()).collect();
        assert_eq!(names, vec!["global", "a"]);
        let categories = read_categories(out).unwrap();
        assert_eq!(
            categories,
            vec![CategoryManifestEntry {
                code: "a".to_string(),
                name: "A".to_string(),
                count: 3,
                width: 1,
            }]
        );
        assert!(!out.join(".rules.txt.tmp").exists());
    }

    #[test]
    fn test_unpublished_space_is_inconsistent() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path();
        let index = CategoryIndex::build(&corpus(&[("a", 3)])).unwrap();
        let spaces = vec![published(out, "global", "orig_data", 3, 16)];
        let expected = vec!["global".to_string(), "a".to_string()];

        let err = emit_manifests(out, &Config::default(), &expected, &spaces, &index).unwrap_err();
        assert_eq!(err.kind(), "ManifestConsistencyError");
        assert!(err.to_string().contains("`a`"));
        assert!(!out.join(RULES_FILE).exists());
        assert!(!out.join(CATEGORIES_MANIFEST).exists());
    }

    #[test]
    fn test_file_count_mismatch_is_inconsistent() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path();
        let index = CategoryIndex::build(&corpus(&[("a", 3)])).unwrap();
        let spaces = vec![
            published(out, "global", "orig_data", 3, 16),
            published(out, "a", "categories/a", 3, 15),
        ];
        let expected = vec!["global".to_string(), "a".to_string()];

        let err = emit_manifests(out, &Config::default(), &expected, &spaces, &index).unwrap_err();
        assert_eq!(err.kind(), "ManifestConsistencyError");
        assert!(err.to_string().contains("15 files"));
        assert!(!out.join(RULES_FILE).exists());
    }
}
