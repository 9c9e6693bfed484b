//! Output tree verification.
//!
//! Re-reads a generated tree and checks it against its own manifests:
//!
//! - every space listed in `rules.txt` holds exactly `capacity` shard
//!   files, named by the zero-padded addresses `0 .. capacity`;
//! - `capacity` is `radix^width` and `width` is minimal for `count`;
//! - every shard parses as a record, and category shards belong to their
//!   category;
//! - the recomputed digest matches the recorded one;
//! - `categories.json` agrees with `rules.txt` on count and width.
//!
//! Problems are collected rather than returned on the first hit so one run
//! shows everything that is wrong.

use anyhow::Result;
use std::collections::BTreeSet;
use std::path::Path;
use walkdir::WalkDir;

use quote_shards_core::{min_width_for, render_address, Radix};

use crate::config::Config;
use crate::manifest::{self, RuleEntry};
use crate::models::{SentenceRecord, GLOBAL_SPACE};
use crate::writer::{shard_name, ShardDigest};

#[derive(Debug, Default)]
pub struct VerifyReport {
    pub spaces: usize,
    pub files: usize,
    pub problems: Vec<String>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

pub fn verify_output(config: &Config, output: &Path) -> Result<VerifyReport> {
    let limits = config.plan_limits()?;
    let rules = manifest::read_rules(output)?.ok_or_else(|| {
        anyhow::anyhow!(
            "{} not found in {}",
            manifest::RULES_FILE,
            output.display()
        )
    })?;
    let categories = manifest::read_categories(output)?;

    let mut report = VerifyReport::default();

    for entry in &rules {
        report.spaces += 1;

        let capacity = limits.radix.capacity(entry.width);
        if capacity != Some(entry.capacity) {
            report.problems.push(format!(
                "space `{}`: capacity {} is not {}^{}",
                entry.space,
                entry.capacity,
                limits.radix.get(),
                entry.width
            ));
            continue;
        }
        let minimal = min_width_for(entry.count, limits.radix).max(limits.min_width);
        if entry.width != minimal {
            report.problems.push(format!(
                "space `{}`: width {} is not minimal for {} items (expected {})",
                entry.space, entry.width, entry.count, minimal
            ));
        }

        report.files += verify_space(config, output, entry, limits.radix, &mut report.problems);
    }

    let rule_codes: BTreeSet<&str> = rules
        .iter()
        .map(|r| r.space.as_str())
        .filter(|s| *s != GLOBAL_SPACE)
        .collect();
    let manifest_codes: BTreeSet<&str> = categories.iter().map(|c| c.code.as_str()).collect();
    if rule_codes != manifest_codes {
        report.problems.push(format!(
            "{} lists categories {:?} but {} lists {:?}",
            manifest::RULES_FILE,
            rule_codes,
            manifest::CATEGORIES_MANIFEST,
            manifest_codes
        ));
    }
    for cat in &categories {
        if let Some(rule) = rules.iter().find(|r| r.space == cat.code) {
            if rule.count != cat.count || rule.width != cat.width {
                report.problems.push(format!(
                    "category `{}`: {} says count {} width {}, {} says count {} width {}",
                    cat.code,
                    manifest::CATEGORIES_MANIFEST,
                    cat.count,
                    cat.width,
                    manifest::RULES_FILE,
                    rule.count,
                    rule.width
                ));
            }
        }
    }

    if let Some(global) = rules.iter().find(|r| r.space == GLOBAL_SPACE) {
        let total: usize = categories.iter().map(|c| c.count).sum();
        if total != global.count {
            report.problems.push(format!(
                "global count {} differs from the category total {}",
                global.count, total
            ));
        }
    } else {
        report
            .problems
            .push(format!("{} has no `{}` space", manifest::RULES_FILE, GLOBAL_SPACE));
    }

    Ok(report)
}

/// Check one space directory. Returns the number of shard files seen.
fn verify_space(
    config: &Config,
    output: &Path,
    entry: &RuleEntry,
    radix: Radix,
    problems: &mut Vec<String>,
) -> usize {
    let dir = output.join(&entry.path);
    let ext = &config.output.extension;

    let mut present = BTreeSet::new();
    for item in WalkDir::new(&dir).min_depth(1) {
        match item {
            Ok(e) if e.file_type().is_file() && e.depth() == 1 => {
                present.insert(e.file_name().to_string_lossy().to_string());
            }
            Ok(e) => problems.push(format!(
                "space `{}`: unexpected entry {}",
                entry.space,
                e.path().display()
            )),
            Err(e) => {
                problems.push(format!("space `{}`: {}", entry.space, e));
                return 0;
            }
        }
    }

    let mut digest = ShardDigest::new();
    let mut seen = 0usize;
    for address in 0..entry.capacity {
        let name = shard_name(&render_address(address, entry.width, radix), ext);
        if !present.remove(&name) {
            problems.push(format!("space `{}`: missing {}", entry.space, name));
            continue;
        }
        seen += 1;

        let bytes = match std::fs::read(dir.join(&name)) {
            Ok(b) => b,
            Err(e) => {
                problems.push(format!("space `{}`: read {}: {}", entry.space, name, e));
                continue;
            }
        };
        match serde_json::from_slice::<SentenceRecord>(&bytes) {
            Ok(record) => {
                if entry.space != GLOBAL_SPACE && record.category != entry.space {
                    problems.push(format!(
                        "space `{}`: {} holds a record of category `{}`",
                        entry.space, name, record.category
                    ));
                }
            }
            Err(e) => problems.push(format!("space `{}`: {} is not a record: {}", entry.space, name, e)),
        }
        digest.add(&name, &bytes);
    }

    for extra in present {
        problems.push(format!("space `{}`: stale file {}", entry.space, extra));
    }

    if seen == entry.capacity && digest.finish() != entry.digest {
        problems.push(format!(
            "space `{}`: content digest does not match {}",
            entry.space,
            manifest::RULES_FILE
        ));
    }

    seen
}
