use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use fs2::FileExt;
use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RetrainStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl RetrainStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, RetrainStatus::Succeeded | RetrainStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrainSnapshot {
    pub reason: String,
    pub status: RetrainStatus,
    pub queued_at: String,
    pub finished_at: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<RetrainSnapshot>,
    changed: Condvar,
}

#[derive(Debug, Clone)]
pub struct RetrainHandle {
    shared: Arc<Shared>,
}

impl RetrainHandle {
    pub fn queued(reason: &str) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RetrainSnapshot {
                    reason: reason.to_string(),
                    status: RetrainStatus::Queued,
                    queued_at: Utc::now().to_rfc3339(),
                    finished_at: None,
                    error: None,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn snapshot(&self) -> RetrainSnapshot {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn status(&self) -> RetrainStatus {
        self.snapshot().status
    }

    fn set(&self, status: RetrainStatus, error: Option<String>) {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.status = status;
        if status.is_finished() {
            state.finished_at = Some(Utc::now().to_rfc3339());
            state.error = error;
        }
        self.shared.changed.notify_all();
    }

    pub fn wait(&self, timeout: Duration) -> RetrainStatus {
        let deadline = Instant::now() + timeout;
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !state.status.is_finished() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (next, _) = self
                .shared
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
        state.status
    }
}

pub trait RetrainScheduler {
    fn schedule(&self, reason: &str) -> RetrainHandle;
}

// Advisory lock; the OS releases it if the holding process dies.
#[derive(Debug)]
pub struct PipelineLock {
    file: File,
    path: PathBuf,
}

impl PipelineLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok();
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("open pipeline lock {}", path.display()))?;
        FileExt::try_lock_exclusive(&file).map_err(|err| {
            anyhow!(
                "pipeline lock {} is held by another run ({err})",
                path.display()
            )
        })?;
        file.set_len(0).context("truncate pipeline lock")?;
        writeln!(file, "{} {}", std::process::id(), Utc::now().to_rfc3339())
            .context("write pipeline lock")?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PipelineLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %err, "failed to release pipeline lock");
        }
    }
}

pub struct BackgroundRetrainer<F> {
    job: Arc<F>,
    lock_path: PathBuf,
}

impl<F> BackgroundRetrainer<F>
where
    F: Fn() -> Result<()> + Send + Sync + 'static,
{
    pub fn new(lock_path: PathBuf, job: F) -> Self {
        Self {
            job: Arc::new(job),
            lock_path,
        }
    }
}

impl<F> RetrainScheduler for BackgroundRetrainer<F>
where
    F: Fn() -> Result<()> + Send + Sync + 'static,
{
    fn schedule(&self, reason: &str) -> RetrainHandle {
        let handle = RetrainHandle::queued(reason);
        let worker = handle.clone();
        let job = Arc::clone(&self.job);
        let lock_path = self.lock_path.clone();
        let reason = reason.to_string();
        info!(%reason, "retrain scheduled");

        let spawned = thread::Builder::new()
            .name("retrain".to_string())
            .spawn(move || {
                let lock = match PipelineLock::acquire(&lock_path) {
                    Ok(lock) => lock,
                    Err(err) => {
                        warn!(%reason, error = %err, "retrain not started");
                        worker.set(RetrainStatus::Failed, Some(format!("{err:#}")));
                        return;
                    }
                };
                worker.set(RetrainStatus::Running, None);
                let outcome = match catch_unwind(AssertUnwindSafe(|| (*job)())) {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(err)) => Err(format!("{err:#}")),
                    Err(_) => Err("retrain panicked".to_string()),
                };
                drop(lock);
                match outcome {
                    Ok(()) => {
                        info!(%reason, "retrain succeeded");
                        worker.set(RetrainStatus::Succeeded, None);
                    }
                    Err(message) => {
                        error!(%reason, error = %message, "retrain failed");
                        worker.set(RetrainStatus::Failed, Some(message));
                    }
                }
            });
        if let Err(err) = spawned {
            error!(error = %err, "could not spawn retrain thread");
            handle.set(RetrainStatus::Failed, Some(err.to_string()));
        }
        handle
    }
}
