//! Bundle tarball archival pipeline.
//!
//! Serializes the content store into a zstd-compressed tar. A dispatcher
//! enqueues one job per file onto a bounded channel and closes it; a single
//! blocking archival task drains the channel into the tar encoder and
//! answers each job on its result channel; the collector advances the
//! progress bar per completed job and exits once every dispatched job has
//! been collected. Channel capacity equals the file count, so backpressure
//! only engages if the encoder falls behind.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;

use uds_bundler_core::cancel::CancelToken;
use uds_bundler_core::error::{BundleError, Result};
use uds_bundler_core::progress::ProgressSink;

use crate::oci::PathMap;

struct ArchiveJob {
    source: PathBuf,
    dest: String,
    result: mpsc::Sender<Result<()>>,
}

/// Write every entry of `path_map` into a `tar.zst` archive at `dest`.
pub async fn write_archive(
    path_map: &PathMap,
    dest: &Path,
    progress: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<()> {
    let total = path_map.len();
    let capacity = total.max(1);

    let (job_tx, job_rx) = mpsc::channel::<ArchiveJob>(capacity);
    let (result_tx, mut result_rx) = mpsc::channel::<Result<()>>(capacity);

    let writer = spawn_archival_task(dest.to_path_buf(), job_rx);
    progress.start(total as u64);

    // Dispatch every job, then close the channel so the archival task can
    // finish the encoder.
    for (source, dest_path) in path_map {
        cancel.ensure_active()?;
        let job = ArchiveJob {
            source: source.clone(),
            dest: dest_path.clone(),
            result: result_tx.clone(),
        };
        job_tx
            .send(job)
            .await
            .map_err(|_| BundleError::Archive("archival task stopped early".to_string()))?;
    }
    drop(job_tx);
    drop(result_tx);

    // Collect exactly as many results as were dispatched; the job channel
    // draining is not a completion signal on its own.
    let mut collected = 0;
    while collected < total {
        cancel.ensure_active()?;
        match result_rx.recv().await {
            Some(Ok(())) => {
                collected += 1;
                progress.advance(1);
            }
            Some(Err(err)) => {
                let msg = format!("failed to archive entry: {}", err);
                progress.fail(&msg);
                return Err(BundleError::Archive(msg));
            }
            None => {
                return Err(BundleError::Archive(
                    "archival task exited before all entries were written".to_string(),
                ));
            }
        }
    }

    writer
        .await
        .map_err(|e| BundleError::Archive(format!("archival task panicked: {}", e)))??;

    progress.success(&format!("Created bundle archive at: {}", dest.display()));
    Ok(())
}

/// The single archival consumer: owns the file handle, the zstd encoder,
/// and the tar builder for the whole run.
fn spawn_archival_task(
    dest: PathBuf,
    mut jobs: mpsc::Receiver<ArchiveJob>,
) -> tokio::task::JoinHandle<Result<()>> {
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::create(&dest)?;
        let encoder = zstd::stream::write::Encoder::new(file, 0)
            .map_err(|e| BundleError::Archive(format!("zstd encoder: {}", e)))?;
        let mut builder = tar::Builder::new(encoder);

        while let Some(job) = jobs.blocking_recv() {
            let appended = builder
                .append_path_with_name(&job.source, &job.dest)
                .map_err(BundleError::from);
            let failed = appended.is_err();
            let _ = job.result.blocking_send(appended);
            if failed {
                // The archive is unusable once an entry failed mid-stream;
                // leftover bytes at dest are the caller's to clean up.
                return Err(BundleError::Archive(format!(
                    "entry {} failed",
                    job.dest
                )));
            }
        }

        let encoder = builder
            .into_inner()
            .map_err(|e| BundleError::Archive(format!("finalize tar: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| BundleError::Archive(format!("finalize zstd: {}", e)))?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;
    use uds_bundler_core::NoProgress;

    #[derive(Default)]
    struct CountingSink {
        started: AtomicU64,
        advanced: AtomicU64,
    }

    impl ProgressSink for CountingSink {
        fn start(&self, total: u64) {
            self.started.store(total, Ordering::SeqCst);
        }
        fn advance(&self, n: u64) {
            self.advanced.fetch_add(n, Ordering::SeqCst);
        }
        fn success(&self, _msg: &str) {}
        fn fail(&self, _msg: &str) {}
    }

    fn fixture(tmp: &TempDir, files: &[(&str, &[u8])]) -> PathMap {
        let mut map = PathMap::new();
        for (name, content) in files {
            let path = tmp.path().join(name);
            std::fs::write(&path, content).unwrap();
            map.insert(path, format!("blobs/sha256/{}", name));
        }
        map
    }

    fn unpack(archive: &Path, target: &Path) {
        let file = std::fs::File::open(archive).unwrap();
        let decoder = zstd::stream::read::Decoder::new(file).unwrap();
        tar::Archive::new(decoder).unpack(target).unwrap();
    }

    #[tokio::test]
    async fn test_archive_round_trip() {
        let tmp = TempDir::new().unwrap();
        let map = fixture(&tmp, &[("aaa", b"first"), ("bbb", b"second")]);
        let dest = tmp.path().join("bundle.tar.zst");

        write_archive(&map, &dest, &NoProgress, &CancelToken::new())
            .await
            .unwrap();

        let out = tmp.path().join("out");
        unpack(&dest, &out);
        assert_eq!(
            std::fs::read(out.join("blobs/sha256/aaa")).unwrap(),
            b"first"
        );
        assert_eq!(
            std::fs::read(out.join("blobs/sha256/bbb")).unwrap(),
            b"second"
        );
    }

    #[tokio::test]
    async fn test_archive_reports_progress_per_entry() {
        let tmp = TempDir::new().unwrap();
        let map = fixture(&tmp, &[("a", b"1"), ("b", b"2"), ("c", b"3")]);
        let dest = tmp.path().join("bundle.tar.zst");

        let sink = CountingSink::default();
        write_archive(&map, &dest, &sink, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(sink.started.load(Ordering::SeqCst), 3);
        assert_eq!(sink.advanced.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_missing_source_file_fails() {
        let tmp = TempDir::new().unwrap();
        let mut map = fixture(&tmp, &[("a", b"1")]);
        map.insert(
            tmp.path().join("does-not-exist"),
            "blobs/sha256/missing".to_string(),
        );
        let dest = tmp.path().join("bundle.tar.zst");

        let err = write_archive(&map, &dest, &NoProgress, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BundleError::Archive(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let tmp = TempDir::new().unwrap();
        let map = fixture(&tmp, &[("a", b"1")]);
        let dest = tmp.path().join("bundle.tar.zst");

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = write_archive(&map, &dest, &NoProgress, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BundleError::Cancelled));
    }
}
