//! Generation run orchestration.
//!
//! Coordinates the full flow: corpus → category index → plans → staged
//! shards → publish → manifests.
//!
//! 1. Load the corpus and build the [`CategoryIndex`]. Declaration errors
//!    stop the run here, before the output directory is touched.
//! 2. Plan every space (global plus one per category). Planning is pure and
//!    cheap, so all of it happens before any write.
//! 3. Stage each space on a bounded worker pool. Workers own disjoint
//!    directories. The first failure sets a shared cancel flag; the other
//!    workers stop at their next file and the staging root is discarded.
//! 4. Publish the staged spaces and drop spaces that disappeared since the
//!    previous run. The old manifests are withdrawn for the swap and the
//!    whole swap is rolled back if any move fails. Then emit `rules.txt` and
//!    `categories.json`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use quote_shards_core::{plan_space, SpacePlan};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::{self, Config};
use crate::corpus;
use crate::error::{GenerateError, GenerateResult};
use crate::index::CategoryIndex;
use crate::manifest::{self, CATEGORIES_MANIFEST, RULES_FILE};
use crate::models::{Corpus, SentenceRecord, SpaceKind};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::writer::{self, StagedSpace, WriteOptions, BACKUP_DIR, STAGING_DIR};

/// Per-run switches from the command line.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Plan only; write nothing.
    pub dry_run: bool,
    /// Overrides `generate.jobs`.
    pub jobs: Option<usize>,
}

/// Outcome for one space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceSummary {
    pub space: String,
    pub path: String,
    pub width: u32,
    pub capacity: usize,
    pub count: usize,
    /// `None` on a dry run.
    pub digest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateSummary {
    /// Global first, then categories by code.
    pub spaces: Vec<SpaceSummary>,
    pub dry_run: bool,
}

/// A planned space with the records it covers.
struct SpaceJob {
    kind: SpaceKind,
    path: String,
    plan: SpacePlan,
    records: Arc<Vec<SentenceRecord>>,
}

/// Load the corpus from `source` and run the generator.
pub async fn run_generate(
    config: &Config,
    source: &str,
    output: &Path,
    opts: &GenerateOptions,
    progress: Arc<dyn ProgressReporter>,
) -> GenerateResult<GenerateSummary> {
    let source = corpus::source_from_arg(source, &config.corpus);
    progress.report(ProgressEvent::Loading {
        source: source.describe(),
    });
    let corpus = source.load().await?;
    tracing::info!(
        source = %source.describe(),
        sentences = corpus.sentences.len(),
        categories = corpus.categories.len(),
        "loaded corpus"
    );

    generate_corpus(config, corpus, output, opts, progress).await
}

/// Run the generator over an already loaded corpus.
pub async fn generate_corpus(
    config: &Config,
    corpus: Corpus,
    output: &Path,
    opts: &GenerateOptions,
    progress: Arc<dyn ProgressReporter>,
) -> GenerateResult<GenerateSummary> {
    let (index, jobs) = plan_jobs(config, corpus)?;
    for job in &jobs {
        progress.report(ProgressEvent::Planned {
            space: job.plan.space.name.clone(),
            width: job.plan.space.width,
            capacity: job.plan.space.capacity as u64,
        });
    }

    if opts.dry_run {
        return Ok(GenerateSummary {
            spaces: jobs
                .iter()
                .map(|job| summarize(&job.plan, &job.path, None))
                .collect(),
            dry_run: true,
        });
    }

    std::fs::create_dir_all(output)
        .map_err(|e| GenerateError::io("output", format!("create {}", output.display()), e))?;
    writer::clear_staging(output)
        .map_err(|e| GenerateError::io("output", "clear staging directory", e))?;
    if writer::clear_backup(output)
        .map_err(|e| GenerateError::io("output", "clear backup directory", e))?
    {
        tracing::warn!("removed content left over from an interrupted publish");
    }

    let expected: Vec<String> = jobs.iter().map(|j| j.kind.name().to_string()).collect();
    let current_paths: Vec<String> = jobs.iter().map(|j| j.path.clone()).collect();

    let staged = match stage_all(config, jobs, output, opts, progress.clone()).await {
        Ok(staged) => staged,
        Err(e) => {
            if let Err(clean) = writer::clear_staging(output) {
                tracing::warn!(error = %clean, "failed to remove staging directory");
            }
            return Err(e);
        }
    };

    let stale = stale_paths(output, &current_paths);
    if let Err(e) = writer::publish(
        output,
        &staged,
        &stale,
        &[RULES_FILE, CATEGORIES_MANIFEST],
        progress.as_ref(),
    ) {
        if let Err(clean) = writer::clear_staging(output) {
            tracing::warn!(error = %clean, "failed to remove staging directory");
        }
        return Err(e);
    }
    writer::clear_staging(output)
        .map_err(|e| GenerateError::io("output", "remove staging directory", e))?;

    manifest::emit_manifests(output, config, &expected, &staged, &index)?;

    Ok(GenerateSummary {
        spaces: staged
            .iter()
            .map(|s| summarize(&s.plan, &s.path, Some(s.digest.clone())))
            .collect(),
        dry_run: false,
    })
}

/// Build the index and plan every space. Nothing is written.
fn plan_jobs(config: &Config, corpus: Corpus) -> GenerateResult<(CategoryIndex, Vec<SpaceJob>)> {
    let limits = config
        .plan_limits()
        .map_err(|e| GenerateError::config(e.to_string()))?;
    let index = CategoryIndex::build(&corpus)?;

    let mut jobs = Vec::with_capacity(index.len() + 1);
    let global = Arc::new(corpus.sentences);
    jobs.push(SpaceJob {
        kind: SpaceKind::Global,
        path: config.global_path().to_string(),
        plan: plan_space(SpaceKind::Global.name(), global.len(), &limits)?,
        records: global,
    });
    for entry in index.iter() {
        let kind = SpaceKind::Category {
            code: entry.code.clone(),
        };
        jobs.push(SpaceJob {
            path: config.category_path(&entry.code),
            plan: plan_space(kind.name(), entry.records.len(), &limits)?,
            records: Arc::new(entry.records.clone()),
            kind,
        });
    }

    check_paths(&jobs)?;
    Ok((index, jobs))
}

/// Names at the top of the output directory that spaces may not claim.
fn reserved_names() -> [String; 6] {
    [
        STAGING_DIR.to_string(),
        BACKUP_DIR.to_string(),
        RULES_FILE.to_string(),
        CATEGORIES_MANIFEST.to_string(),
        format!(".{}.tmp", RULES_FILE),
        format!(".{}.tmp", CATEGORIES_MANIFEST),
    ]
}

fn first_component(path: &str) -> String {
    Path::new(path)
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .unwrap_or_default()
}

fn overlaps(a: &str, b: &str) -> bool {
    let (a, b) = (Path::new(a), Path::new(b));
    a.starts_with(b) || b.starts_with(a)
}

/// Every space path must stay inside the output root and own its subtree.
fn check_paths(jobs: &[SpaceJob]) -> GenerateResult<()> {
    let reserved = reserved_names();
    for (i, job) in jobs.iter().enumerate() {
        let name = job.kind.name();
        if !config::is_contained(&job.path) {
            return Err(GenerateError::config_in(
                name,
                format!("output path '{}' is not a plain relative path", job.path),
            ));
        }
        if reserved.contains(&first_component(&job.path)) {
            return Err(GenerateError::config_in(
                name,
                format!("output path '{}' uses a reserved name", job.path),
            ));
        }
        if let Some(other) = jobs[i + 1..].iter().find(|o| overlaps(&job.path, &o.path)) {
            return Err(GenerateError::config_in(
                name,
                format!(
                    "output path '{}' overlaps '{}' of space `{}`",
                    job.path,
                    other.path,
                    other.kind.name()
                ),
            ));
        }
    }
    Ok(())
}

/// Paths from the previous `rules.txt` that this run no longer produces.
///
/// Only paths that are safely inside the output root and disjoint from
/// every current space are returned.
fn stale_paths(output: &Path, current: &[String]) -> Vec<String> {
    let previous = match manifest::read_rules(output) {
        Ok(Some(entries)) => entries,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable previous rules manifest");
            return Vec::new();
        }
    };
    let reserved = reserved_names();
    previous
        .into_iter()
        .map(|e| e.path)
        .filter(|p| config::is_contained(p))
        .filter(|p| !reserved.contains(&first_component(p)))
        .filter(|p| !current.iter().any(|c| overlaps(c, p)))
        .collect()
}

/// Stage every job on a bounded pool; fail fast on the first error.
async fn stage_all(
    config: &Config,
    jobs: Vec<SpaceJob>,
    output: &Path,
    opts: &GenerateOptions,
    progress: Arc<dyn ProgressReporter>,
) -> GenerateResult<Vec<StagedSpace>> {
    let workers = opts.jobs.unwrap_or_else(|| config.jobs()).max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    let cancel = Arc::new(AtomicBool::new(false));
    let staging_root = output.join(STAGING_DIR);
    let write_opts = Arc::new(WriteOptions {
        extension: config.output.extension.clone(),
        retries: config.generate.write_retries,
        backoff: Duration::from_millis(config.generate.retry_backoff_ms),
    });

    let mut join_set: JoinSet<GenerateResult<StagedSpace>> = JoinSet::new();
    for job in jobs {
        let sem = semaphore.clone();
        let cancel = cancel.clone();
        let staging_root = staging_root.clone();
        let write_opts = write_opts.clone();
        let progress = progress.clone();

        join_set.spawn(async move {
            let name = job.kind.name().to_string();
            let _permit = sem.acquire_owned().await.map_err(|_| {
                GenerateError::io(&name, "acquire worker", std::io::Error::other("pool closed"))
            })?;
            if cancel.load(Ordering::Relaxed) {
                return Err(GenerateError::io(
                    &name,
                    "write cancelled",
                    std::io::Error::new(std::io::ErrorKind::Interrupted, "another space failed"),
                ));
            }

            let worker_name = name.clone();
            tokio::task::spawn_blocking(move || {
                writer::stage_space(
                    job.plan,
                    &job.records,
                    &job.path,
                    &staging_root,
                    &write_opts,
                    &cancel,
                    progress.as_ref(),
                )
            })
            .await
            .map_err(|e| {
                GenerateError::io(&worker_name, "space worker panicked", std::io::Error::other(e))
            })?
        });
    }

    let mut staged = Vec::new();
    let mut first_err: Option<GenerateError> = None;
    while let Some(joined) = join_set.join_next().await {
        let result = joined
            .map_err(|e| GenerateError::io("worker", "join worker", std::io::Error::other(e)))
            .and_then(|r| r);
        match result {
            Ok(space) => staged.push(space),
            Err(e) => {
                if first_err.is_none() {
                    tracing::warn!(space = e.space().unwrap_or("?"), error = %e, "space failed, cancelling run");
                    cancel.store(true, Ordering::Relaxed);
                    first_err = Some(e);
                }
            }
        }
    }

    if let Some(e) = first_err {
        return Err(e);
    }

    staged.sort_by(|a, b| {
        let key = |s: &StagedSpace| {
            (
                s.plan.space.name != crate::models::GLOBAL_SPACE,
                s.plan.space.name.clone(),
            )
        };
        key(a).cmp(&key(b))
    });
    Ok(staged)
}

fn summarize(plan: &SpacePlan, path: &str, digest: Option<String>) -> SpaceSummary {
    SpaceSummary {
        space: plan.space.name.clone(),
        path: path.to_string(),
        width: plan.space.width,
        capacity: plan.space.capacity,
        count: plan.space.item_count,
        digest,
    }
}
