//! Shard writer.
//!
//! Writes one file per address of a planned space. Files are staged under
//! `{output}/.staging/{space_path}` and only moved into place by
//! [`publish`] once every space of the run staged cleanly. Publishing parks
//! the previous tree and rolls back on failure, so a failed run leaves the
//! previous tree and its manifests in place and a successful one never mixes
//! address widths.
//!
//! # Layout
//!
//! ```text
//! {output}/orig_data/00.json … ff.json
//! {output}/categories/a/0.json … f.json
//! ```
//!
//! Shard bytes are the pretty-printed record plus a trailing newline. The
//! serialization has a fixed field order, so identical input produces
//! identical bytes.

use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use quote_shards_core::{PlanError, SpacePlan};

use crate::error::{GenerateError, GenerateResult};
use crate::models::SentenceRecord;
use crate::progress::{ProgressEvent, ProgressReporter, WRITE_REPORT_EVERY};

/// Staging directory name inside the output root.
pub const STAGING_DIR: &str = ".staging";

/// Where [`publish`] parks the previous tree until the swap is complete.
pub const BACKUP_DIR: &str = ".previous";

/// Settings shared by every worker in a run.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Shard file extension, without the dot.
    pub extension: String,
    /// Extra attempts after a transient failure.
    pub retries: u32,
    /// Delay before the first retry; doubles each attempt.
    pub backoff: Duration,
}

/// A fully written space waiting to be published.
#[derive(Debug, Clone)]
pub struct StagedSpace {
    pub plan: SpacePlan,
    /// Path relative to the output root (e.g. `categories/a`).
    pub path: String,
    pub staged_dir: PathBuf,
    /// SHA-256 over shard names and bytes in address order.
    pub digest: String,
}

/// Incremental digest of a shard tree.
///
/// Fed `(file name, bytes)` in address order by both the writer and the
/// verifier, so the two agree on what "the same tree" means.
pub struct ShardDigest(Sha256);

impl ShardDigest {
    pub fn new() -> Self {
        ShardDigest(Sha256::new())
    }

    pub fn add(&mut self, name: &str, bytes: &[u8]) {
        self.0.update(name.as_bytes());
        self.0.update([0u8]);
        self.0.update((bytes.len() as u64).to_be_bytes());
        self.0.update(bytes);
    }

    pub fn finish(self) -> String {
        hex::encode(self.0.finalize())
    }
}

impl Default for ShardDigest {
    fn default() -> Self {
        Self::new()
    }
}

/// Shard file name for a rendered address.
pub fn shard_name(address: &str, extension: &str) -> String {
    format!("{}.{}", address, extension)
}

/// Stable serialized form of one record.
pub fn serialize_record(record: &SentenceRecord) -> serde_json::Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(record)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Write every address of `plan` into `staging_root/path`.
///
/// `records` is the subset the plan was computed for. Checks `cancel`
/// between files and gives up with an `Interrupted` error once it is set.
pub fn stage_space(
    plan: SpacePlan,
    records: &[SentenceRecord],
    path: &str,
    staging_root: &Path,
    opts: &WriteOptions,
    cancel: &AtomicBool,
    progress: &dyn ProgressReporter,
) -> GenerateResult<StagedSpace> {
    let space = plan.space.name.clone();
    if records.len() != plan.space.item_count {
        return Err(PlanError::Invariant {
            space,
            detail: format!(
                "planned for {} items but given {}",
                plan.space.item_count,
                records.len()
            ),
        }
        .into());
    }

    let staged_dir = staging_root.join(path);
    if staged_dir.exists() {
        std::fs::remove_dir_all(&staged_dir).map_err(|e| {
            GenerateError::io(&space, format!("clear {}", staged_dir.display()), e)
        })?;
    }
    std::fs::create_dir_all(&staged_dir)
        .map_err(|e| GenerateError::io(&space, format!("create {}", staged_dir.display()), e))?;

    // Each record is serialized once, however many addresses it gets.
    let payloads = records
        .iter()
        .map(serialize_record)
        .collect::<serde_json::Result<Vec<_>>>()
        .map_err(|e| GenerateError::io(&space, "serialize record", e.into()))?;

    let total = plan.space.capacity as u64;
    let mut digest = ShardDigest::new();

    for (address, item) in plan.assignment.iter() {
        if cancel.load(Ordering::Relaxed) {
            return Err(GenerateError::io(
                &space,
                "write cancelled",
                std::io::Error::new(ErrorKind::Interrupted, "another space failed"),
            ));
        }

        let name = shard_name(&plan.space.render(address), &opts.extension);
        let bytes = &payloads[item];
        let file = staged_dir.join(&name);
        write_with_retry(&file, bytes, opts)
            .map_err(|e| GenerateError::io(&space, format!("write {}/{}", path, name), e))?;
        digest.add(&name, bytes);

        let n = address as u64 + 1;
        if n % WRITE_REPORT_EVERY as u64 == 0 || n == total {
            progress.report(ProgressEvent::Writing {
                space: space.clone(),
                n,
                total,
            });
        }
    }

    let digest = digest.finish();
    tracing::debug!(%space, files = total, %digest, "staged space");

    Ok(StagedSpace {
        plan,
        path: path.to_string(),
        staged_dir,
        digest,
    })
}

fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
    )
}

/// Write `bytes` to `path`, retrying transient failures with backoff.
pub fn write_with_retry(path: &Path, bytes: &[u8], opts: &WriteOptions) -> std::io::Result<()> {
    retry_transient(path, opts, || std::fs::write(path, bytes))
}

/// Run `op` until it succeeds, fails with a non-transient error, or has
/// used up `opts.retries` extra attempts.
fn retry_transient<F>(path: &Path, opts: &WriteOptions, mut op: F) -> std::io::Result<()>
where
    F: FnMut() -> std::io::Result<()>,
{
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(()) => return Ok(()),
            Err(e) if is_transient(&e) && attempt < opts.retries => {
                let delay = opts.backoff * (1u32 << attempt.min(10));
                tracing::warn!(path = %path.display(), error = %e, attempt, "transient write failure, retrying");
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// One path moved during publish, remembered so it can be undone.
struct Swap {
    target: PathBuf,
    /// Where the previous content was parked, if there was any.
    backup: Option<PathBuf>,
    /// The staged tree now sits at `target`.
    installed: bool,
}

fn rename_into(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(from, to)
}

/// Park `output/rel` under the backup root if it exists.
fn park(output: &Path, backup_root: &Path, rel: &str, swaps: &mut Vec<Swap>) -> std::io::Result<()> {
    let target = output.join(rel);
    let backup = if target.exists() {
        let backup = backup_root.join(rel);
        rename_into(&target, &backup)?;
        Some(backup)
    } else {
        None
    };
    swaps.push(Swap {
        target,
        backup,
        installed: false,
    });
    Ok(())
}

/// Undo `swaps` in reverse order. Returns false if anything could not be
/// put back.
fn roll_back(swaps: &[Swap]) -> bool {
    let mut clean = true;
    for swap in swaps.iter().rev() {
        let restored = (|| -> std::io::Result<()> {
            if swap.installed {
                std::fs::remove_dir_all(&swap.target)?;
            }
            match &swap.backup {
                Some(backup) => rename_into(backup, &swap.target),
                None => Ok(()),
            }
        })();
        if let Err(e) = restored {
            tracing::warn!(path = %swap.target.display(), error = %e, "failed to restore previous content");
            clean = false;
        }
    }
    clean
}

/// Move staged spaces into the output tree.
///
/// `withdraw` names manifest files that describe the previous tree; they are
/// parked first so no manifest ever sits next to a tree it does not
/// describe. Then stale spaces and the previous subtree of every staged
/// space are parked under [`BACKUP_DIR`] and the staged directories renamed
/// into place.
///
/// If any step fails, everything already moved is put back, the manifests
/// included, and the output is as it was before the call. If that restore
/// fails too, the manifests stay withdrawn and the parked content is left in
/// [`BACKUP_DIR`].
pub fn publish(
    output: &Path,
    staged: &[StagedSpace],
    stale: &[String],
    withdraw: &[&str],
    progress: &dyn ProgressReporter,
) -> GenerateResult<()> {
    let backup_root = output.join(BACKUP_DIR);
    let mut manifests = Vec::new();
    let mut swaps = Vec::new();

    let result = (|| -> GenerateResult<()> {
        for name in withdraw {
            park(output, &backup_root, name, &mut manifests)
                .map_err(|e| GenerateError::io(*name, format!("withdraw {}", name), e))?;
        }
        for path in stale {
            park(output, &backup_root, path, &mut swaps)
                .map_err(|e| GenerateError::io(path, format!("remove stale {}", path), e))?;
        }
        for space in staged {
            let name = &space.plan.space.name;
            park(output, &backup_root, &space.path, &mut swaps)
                .map_err(|e| GenerateError::io(name, format!("move aside {}", space.path), e))?;
            let target = output.join(&space.path);
            rename_into(&space.staged_dir, &target).map_err(|e| {
                GenerateError::io(
                    name,
                    format!(
                        "move {} to {}",
                        space.staged_dir.display(),
                        target.display()
                    ),
                    e,
                )
            })?;
            if let Some(last) = swaps.last_mut() {
                last.installed = true;
            }
        }
        Ok(())
    })();

    if let Err(e) = result {
        if roll_back(&swaps) {
            if roll_back(&manifests) {
                if let Err(clean) = remove_dir_if_exists(&backup_root) {
                    tracing::warn!(error = %clean, "failed to remove backup directory");
                }
            } else {
                tracing::warn!("previous manifests could not be restored");
            }
        } else {
            tracing::warn!(
                backup = %backup_root.display(),
                "output only partly restored; manifests withdrawn"
            );
        }
        return Err(e);
    }

    for path in stale {
        tracing::info!(path = %path, "removed stale space");
    }
    for space in staged {
        tracing::info!(
            space = %space.plan.space.name,
            width = space.plan.space.width,
            files = space.plan.space.capacity,
            "published space"
        );
        progress.report(ProgressEvent::Published {
            space: space.plan.space.name.clone(),
            files: space.plan.space.capacity as u64,
        });
    }

    remove_dir_if_exists(&backup_root)
        .map_err(|e| GenerateError::io("output", format!("remove {}", backup_root.display()), e))
}

fn remove_dir_if_exists(dir: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Remove the staging root, ignoring a missing directory.
pub fn clear_staging(output: &Path) -> std::io::Result<()> {
    remove_dir_if_exists(&output.join(STAGING_DIR))
}

/// Remove a backup root left behind by an earlier publish whose rollback
/// failed. Returns whether there was one.
pub fn clear_backup(output: &Path) -> std::io::Result<bool> {
    let backup = output.join(BACKUP_DIR);
    if !backup.exists() {
        return Ok(false);
    }
    std::fs::remove_dir_all(&backup)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use quote_shards_core::{plan_space, PlanLimits};
    use tempfile::TempDir;

    fn record(text: &str) -> SentenceRecord {
        SentenceRecord {
            id: None,
            uuid: None,
            hitokoto: text.to_string(),
            category: "a".to_string(),
            from: None,
            from_who: None,
            creator: None,
            extra: Default::default(),
        }
    }

    fn opts() -> WriteOptions {
        WriteOptions {
            extension: "json".to_string(),
            retries: 2,
            backoff: Duration::from_millis(1),
        }
    }

    fn stage(root: &Path, records: &[SentenceRecord], path: &str) -> StagedSpace {
        let plan = plan_space("a", records.len(), &PlanLimits::default()).unwrap();
        stage_space(
            plan,
            records,
            path,
            &root.join(STAGING_DIR),
            &opts(),
            &AtomicBool::new(false),
            &NoProgress,
        )
        .unwrap()
    }

    #[test]
    fn test_stage_writes_every_address() {
        let tmp = TempDir::new().unwrap();
        let records: Vec<_> = (0..3).map(|i| record(&format!("q{i}"))).collect();
        let staged = stage(tmp.path(), &records, "categories/a");

        let names: Vec<String> = std::fs::read_dir(&staged.staged_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 16);

        let f: SentenceRecord = serde_json::from_slice(
            &std::fs::read(staged.staged_dir.join("4.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(f.hitokoto, "q1");
    }

    #[test]
    fn test_digest_is_stable() {
        let tmp1 = TempDir::new().unwrap();
        let tmp2 = TempDir::new().unwrap();
        let records: Vec<_> = (0..5).map(|i| record(&format!("q{i}"))).collect();
        let a = stage(tmp1.path(), &records, "orig_data");
        let b = stage(tmp2.path(), &records, "orig_data");
        assert_eq!(a.digest, b.digest);

        let mut changed = records.clone();
        changed[4].hitokoto = "different".into();
        let c = stage(tmp2.path(), &changed, "orig_data");
        assert_ne!(a.digest, c.digest);
    }

    #[test]
    fn test_cancelled_worker_stops() {
        let tmp = TempDir::new().unwrap();
        let records = vec![record("x")];
        let plan = plan_space("a", 1, &PlanLimits::default()).unwrap();
        let err = stage_space(
            plan,
            &records,
            "categories/a",
            &tmp.path().join(STAGING_DIR),
            &opts(),
            &AtomicBool::new(true),
            &NoProgress,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "IOError");
    }

    #[test]
    fn test_publish_replaces_previous_width() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path();

        // A previous run left a width-1 tree.
        let old = out.join("categories/a");
        std::fs::create_dir_all(&old).unwrap();
        for d in "0123456789abcdef".chars() {
            std::fs::write(old.join(format!("{d}.json")), "{}").unwrap();
        }

        let records: Vec<_> = (0..17).map(|i| record(&format!("q{i}"))).collect();
        let staged = stage(out, &records, "categories/a");
        publish(out, &[staged], &[], &[], &NoProgress).unwrap();

        let names: Vec<String> = std::fs::read_dir(&old)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 256);
        assert!(names.iter().all(|n| n.len() == "00.json".len()));
    }

    #[test]
    fn test_publish_removes_stale_paths() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path();
        std::fs::create_dir_all(out.join("categories/z")).unwrap();
        std::fs::write(out.join("categories/z/0.json"), "{}").unwrap();

        publish(out, &[], &["categories/z".to_string()], &[], &NoProgress).unwrap();
        assert!(!out.join("categories/z").exists());
        assert!(!out.join(BACKUP_DIR).exists());
    }

    #[test]
    fn test_failed_publish_restores_previous_tree() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path();

        // Previous run: width-1 global and category trees plus a manifest.
        for dir in ["orig_data", "categories/a"] {
            std::fs::create_dir_all(out.join(dir)).unwrap();
            for d in "0123456789abcdef".chars() {
                std::fs::write(out.join(dir).join(format!("{d}.json")), "old").unwrap();
            }
        }
        std::fs::write(out.join("rules.txt"), "previous rules\n").unwrap();
        std::fs::create_dir_all(out.join("categories/z")).unwrap();

        let records: Vec<_> = (0..17).map(|i| record(&format!("q{i}"))).collect();
        let global = stage(out, &records, "orig_data");
        let category = stage(out, &records, "categories/a");
        // The second rename has nothing to move.
        std::fs::remove_dir_all(&category.staged_dir).unwrap();

        let err = publish(
            out,
            &[global, category],
            &["categories/z".to_string()],
            &["rules.txt", "categories.json"],
            &NoProgress,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "IOError");
        assert_eq!(err.space(), Some("a"));

        for dir in ["orig_data", "categories/a"] {
            let names: Vec<String> = std::fs::read_dir(out.join(dir))
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
                .collect();
            assert_eq!(names.len(), 16, "{dir} not restored");
            assert!(names.iter().all(|n| n.len() == "0.json".len()));
        }
        assert!(out.join("categories/z").exists());
        assert_eq!(
            std::fs::read_to_string(out.join("rules.txt")).unwrap(),
            "previous rules\n"
        );
        assert!(!out.join("categories.json").exists());
        assert!(!out.join(BACKUP_DIR).exists());
    }

    #[test]
    fn test_publish_withdraws_manifests() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path();
        std::fs::write(out.join("rules.txt"), "previous rules\n").unwrap();

        let records = vec![record("x")];
        let staged = stage(out, &records, "orig_data");
        publish(out, &[staged], &[], &["rules.txt"], &NoProgress).unwrap();

        assert!(!out.join("rules.txt").exists());
        assert_eq!(std::fs::read_dir(out.join("orig_data")).unwrap().count(), 16);
        assert!(!out.join(BACKUP_DIR).exists());
    }

    fn flaky(failures: Vec<ErrorKind>) -> (impl FnMut() -> std::io::Result<()>, std::rc::Rc<std::cell::Cell<usize>>) {
        let calls = std::rc::Rc::new(std::cell::Cell::new(0));
        let seen = calls.clone();
        let op = move || {
            let n = seen.get();
            seen.set(n + 1);
            match failures.get(n) {
                Some(kind) => Err(std::io::Error::new(*kind, "injected")),
                None => Ok(()),
            }
        };
        (op, calls)
    }

    #[test]
    fn test_retry_recovers_from_transient_errors() {
        let (op, calls) = flaky(vec![ErrorKind::Interrupted, ErrorKind::TimedOut]);
        retry_transient(Path::new("x.json"), &opts(), op).unwrap();
        assert_eq!(calls.get(), 3);

        let (op, calls) = flaky(vec![ErrorKind::WouldBlock]);
        retry_transient(Path::new("x.json"), &opts(), op).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_retry_gives_up_after_limit() {
        let (op, calls) = flaky(vec![ErrorKind::Interrupted; 5]);
        let err = retry_transient(Path::new("x.json"), &opts(), op).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Interrupted);
        // One attempt plus `retries` extra ones.
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_disabled_with_zero() {
        let no_retries = WriteOptions {
            retries: 0,
            ..opts()
        };
        let (op, calls) = flaky(vec![ErrorKind::TimedOut]);
        assert!(retry_transient(Path::new("x.json"), &no_retries, op).is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_non_transient_error_fails_immediately() {
        let (op, calls) = flaky(vec![ErrorKind::PermissionDenied]);
        let err = retry_transient(Path::new("x.json"), &opts(), op).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_clear_staging_missing_ok() {
        let tmp = TempDir::new().unwrap();
        clear_staging(tmp.path()).unwrap();
        assert!(!clear_backup(tmp.path()).unwrap());
    }

    #[test]
    fn test_clear_backup_removes_leftover() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join(BACKUP_DIR).join("orig_data")).unwrap();
        assert!(clear_backup(tmp.path()).unwrap());
        assert!(!tmp.path().join(BACKUP_DIR).exists());
    }
}
