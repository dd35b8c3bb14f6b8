//! Worker runtime: runs prewarm once per process and hosts jobs.

use crate::error::AgentError;
use crate::job::{EntrypointFn, JobContext, JobProcess, JobSettings, WorkerOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tutor_types::SessionState;
use tutor_voice::RoomConnector;

/// Request to run a tutor session in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub room: String,
}

/// An active job as listed by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobInfo {
    pub job_id: String,
    pub room: String,
    pub state: SessionState,
}

struct JobEntry {
    ctx: JobContext,
    task: Option<JoinHandle<()>>,
}

/// Hosts sessions. Cheap to clone.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    entrypoint: EntrypointFn,
    proc: JobProcess,
    connector: Arc<dyn RoomConnector>,
    settings: JobSettings,
    /// Jobs by id.
    ///
    /// Uses `std::sync::RwLock`: every acquisition is a brief map operation
    /// that never spans an `.await`.
    jobs: RwLock<HashMap<String, JobEntry>>,
    shutdown: watch::Sender<bool>,
}

impl Worker {
    /// Runs the prewarm function on a blocking thread and keeps its result
    /// for every job this worker hosts.
    pub async fn start(
        options: WorkerOptions,
        connector: Arc<dyn RoomConnector>,
        settings: JobSettings,
    ) -> Result<Self, AgentError> {
        let prewarm = Arc::clone(&options.prewarm);
        let proc = tokio::task::spawn_blocking(move || prewarm())
            .await
            .map_err(|e| AgentError::Prewarm(format!("prewarm task failed: {}", e)))?
            .map_err(|e| AgentError::Prewarm(e.to_string()))?;
        info!("worker prewarmed");

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(WorkerInner {
                entrypoint: options.entrypoint,
                proc,
                connector,
                settings,
                jobs: RwLock::new(HashMap::new()),
                shutdown,
            }),
        })
    }

    pub fn proc(&self) -> &JobProcess {
        &self.inner.proc
    }

    /// Starts a job for `request.room` and returns its id.
    pub fn dispatch(&self, request: JobRequest) -> Result<String, AgentError> {
        if *self.inner.shutdown.borrow() {
            return Err(AgentError::WorkerClosed);
        }

        let mut jobs = self
            .inner
            .jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        jobs.retain(|_, entry| entry.ctx.state() != SessionState::Closed);
        if jobs.values().any(|entry| entry.ctx.room_name() == request.room) {
            return Err(AgentError::RoomBusy(request.room));
        }

        let job_id = format!("AJ_{}", uuid::Uuid::new_v4().simple());
        let ctx = JobContext::new(
            job_id.clone(),
            request.room.clone(),
            self.inner.proc.clone(),
            Arc::clone(&self.inner.connector),
            self.inner.settings.clone(),
        );
        let task = tokio::spawn(run_job(
            ctx.clone(),
            Arc::clone(&self.inner.entrypoint),
            self.inner.shutdown.subscribe(),
        ));
        info!(%job_id, room = %request.room, "job dispatched");
        jobs.insert(
            job_id.clone(),
            JobEntry {
                ctx,
                task: Some(task),
            },
        );
        Ok(job_id)
    }

    /// Jobs that have not closed yet, ordered by room.
    pub fn active_jobs(&self) -> Vec<JobInfo> {
        let jobs = self
            .inner
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut active: Vec<JobInfo> = jobs
            .iter()
            .filter(|(_, entry)| entry.ctx.state() != SessionState::Closed)
            .map(|(job_id, entry)| JobInfo {
                job_id: job_id.clone(),
                room: entry.ctx.room_name().to_string(),
                state: entry.ctx.state(),
            })
            .collect();
        active.sort_by(|a, b| a.room.cmp(&b.room));
        active
    }

    pub fn job_state(&self, job_id: &str) -> Option<SessionState> {
        self.inner
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .map(|entry| entry.ctx.state())
    }

    /// Asks a job to shut down.
    pub fn stop_job(&self, job_id: &str) -> Result<(), AgentError> {
        let jobs = self
            .inner
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = jobs
            .get(job_id)
            .ok_or_else(|| AgentError::JobNotFound(job_id.to_string()))?;
        entry.ctx.request_shutdown();
        Ok(())
    }

    /// Shuts every job down and waits for them to close.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let tasks: Vec<(String, JoinHandle<()>)> = self
            .inner
            .jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .iter_mut()
            .filter_map(|(job_id, entry)| entry.task.take().map(|task| (job_id.clone(), task)))
            .collect();

        for (job_id, task) in tasks {
            if let Err(e) = task.await {
                error!(%job_id, "job task failed: {}", e);
            }
        }
        info!("worker shut down");
    }
}

async fn run_job(ctx: JobContext, entrypoint: EntrypointFn, mut shutdown: watch::Receiver<bool>) {
    let job_id = ctx.job_id().to_string();

    let reason = tokio::select! {
        result = entrypoint(ctx.clone()) => match result {
            Ok(()) => None,
            Err(e) => {
                warn!(%job_id, "entrypoint failed: {}", e);
                Some(format!("entrypoint failed: {}", e))
            }
        },
        () = ctx.shutdown_requested() => Some("shutdown requested".to_string()),
        () = stopping(&mut shutdown) => Some("worker shutting down".to_string()),
    };

    let reason = match reason {
        Some(reason) => reason,
        None => tokio::select! {
            () = ctx.room_closed() => "room closed".to_string(),
            () = ctx.shutdown_requested() => "shutdown requested".to_string(),
            () = stopping(&mut shutdown) => "worker shutting down".to_string(),
        },
    };

    if let Err(e) = ctx.shutdown(&reason).await {
        error!(%job_id, "job shutdown failed: {}", e);
    }
    info!(%job_id, %reason, "job finished");
}

async fn stopping(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|s| *s).await;
}
