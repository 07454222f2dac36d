use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Externally observable job states. `Stopping` only exists between a
/// stop request and the orchestrator noticing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Initializing,
    Running,
    Stopping,
    Stopped,
    Completed,
    Error,
}

impl JobState {
    /// States in which a stop request is meaningful.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobState::Initializing | JobState::Running | JobState::Stopping
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobState::Initializing => "initializing",
            JobState::Running => "running",
            JobState::Stopping => "stopping",
            JobState::Stopped => "stopped",
            JobState::Completed => "completed",
            JobState::Error => "error",
        };
        write!(f, "{}", label)
    }
}

/// Snapshot of one job's status. Always replaced as a whole so readers
/// never observe a half-updated record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    /// Percentage 0-100.
    pub progress: u8,
    pub current: usize,
    pub total: usize,
    pub message: String,
    pub run_id: Option<String>,
    pub output_file: Option<String>,
    pub error: Option<String>,
}

impl JobStatus {
    pub fn initializing() -> Self {
        Self {
            state: JobState::Initializing,
            progress: 0,
            current: 0,
            total: 0,
            message: "Initializing...".to_string(),
            run_id: None,
            output_file: None,
            error: None,
        }
    }
}

pub fn percentage(current: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((current * 100) / total).min(100) as u8
}

/// 进程内的任务状态表。worker 线程写进度，控制面读状态并写停止标记。
#[derive(Clone, Default)]
pub struct StatusRegistry {
    inner: Arc<Mutex<HashMap<String, JobStatus>>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full-record replace.
    pub fn set(&self, job_id: &str, status: JobStatus) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(job_id.to_string(), status);
    }

    pub fn get(&self, job_id: &str) -> Option<JobStatus> {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.get(job_id).cloned()
    }

    /// Build a replacement record from the current one and swap it in
    /// under a single lock acquisition.
    pub fn update(&self, job_id: &str, f: impl FnOnce(JobStatus) -> JobStatus) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = map.get(job_id).cloned() {
            map.insert(job_id.to_string(), f(current));
        }
    }

    /// Claim the single run slot: insert the new record unless some job
    /// is still active. Check and insert happen under one lock, so two
    /// concurrent claims can never both succeed.
    pub fn try_claim(&self, job_id: &str, status: JobStatus) -> Result<(), String> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((active, _)) = map.iter().find(|(_, status)| status.state.is_active()) {
            return Err(active.clone());
        }
        map.insert(job_id.to_string(), status);
        Ok(())
    }
}
