use crate::core::cancel::StopToken;
use crate::core::error::{AppError, AppResult};
use crate::core::models::{model_family, RunConfig};
use crate::infrastructure::llm::ChatClient;
use crate::services::catalog::Catalog;
use crate::services::evaluator::Evaluator;
use crate::services::report::{self, ResponseDetail, RunResults};
use crate::services::runner::{ExperimentRunner, RunOutcome};
use crate::services::status::{percentage, JobState, JobStatus, StatusRegistry};
use crate::services::store::{ResultsStore, RunSummary};
use chrono::Local;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use uuid::Uuid;

/// Everything needed to launch one experiment job.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Exactly two generation models, from different families.
    pub models: Vec<String>,
    pub judge_model: String,
    pub scenario_ids: Vec<String>,
    pub role_ids: Vec<String>,
    pub num_iterations: u32,
    pub temperature: f64,
    pub judge_temperature: f64,
    pub max_tokens: u32,
}

/// 控制面：启动/查询/停止实验任务。一个编排器实例同一时间只跑一个任务；
/// 任务在独立的 tokio task 上执行，控制面保持可响应。
#[derive(Clone)]
pub struct JobManager {
    client: Arc<dyn ChatClient>,
    catalog: Arc<Catalog>,
    store: ResultsStore,
    registry: StatusRegistry,
    stop_tokens: Arc<Mutex<HashMap<String, StopToken>>>,
}

impl JobManager {
    pub fn new(client: Arc<dyn ChatClient>, catalog: Catalog, store: ResultsStore) -> Self {
        Self {
            client,
            catalog: Arc::new(catalog),
            store,
            registry: StatusRegistry::new(),
            stop_tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &StatusRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ResultsStore {
        &self.store
    }

    /// Validate and launch a job on its own worker task.
    pub fn start(&self, request: RunRequest) -> AppResult<String> {
        self.validate(&request)?;

        let job_id = format!(
            "exp_{}_{}",
            Local::now().format("%Y%m%d_%H%M%S"),
            &Uuid::new_v4().simple().to_string()[..8]
        );

        if let Err(active) = self.registry.try_claim(&job_id, JobStatus::initializing()) {
            return Err(AppError::Validation(format!(
                "another experiment is already running: {}",
                active
            )));
        }

        let token = StopToken::new();
        self.stop_tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job_id.clone(), token.clone());

        info!("启动实验任务: {}", job_id);

        let manager = self.clone();
        let task_job_id = job_id.clone();
        tokio::spawn(async move {
            manager.execute(&task_job_id, request, token).await;
        });

        Ok(job_id)
    }

    /// Current status snapshot, or None for an unknown job id.
    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.registry.get(job_id)
    }

    /// Request cooperative cancellation. Valid only while the job is
    /// initializing or running.
    pub fn stop(&self, job_id: &str) -> AppResult<()> {
        let status = self
            .registry
            .get(job_id)
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))?;

        if !matches!(status.state, JobState::Initializing | JobState::Running) {
            return Err(AppError::Validation(format!(
                "Cannot stop experiment with status: {}",
                status.state
            )));
        }

        if let Some(token) = self
            .stop_tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(job_id)
        {
            token.stop();
        }

        self.registry.update(job_id, |mut status| {
            status.state = JobState::Stopping;
            status.message = "Stopping experiment...".to_string();
            status
        });

        info!("收到停止请求: {}", job_id);
        Ok(())
    }

    /// Read-only projections over persisted runs.
    pub fn list(&self) -> AppResult<Vec<RunSummary>> {
        self.store.list()
    }

    pub fn results(&self, run_id: &str) -> AppResult<RunResults> {
        let run = self.store.load(run_id)?;
        Ok(report::run_results(&run))
    }

    pub fn response_detail(&self, run_id: &str, response_key: &str) -> AppResult<ResponseDetail> {
        let run = self.store.load(run_id)?;
        report::response_detail(&run, response_key)
            .ok_or_else(|| AppError::NotFound(format!("response {}", response_key)))
    }

    pub fn download_path(&self, run_id: &str) -> AppResult<PathBuf> {
        self.store.find(run_id)
    }

    fn validate(&self, request: &RunRequest) -> AppResult<()> {
        if request.models.len() != 2 {
            return Err(AppError::Validation(format!(
                "exactly two generation models are required, got {}",
                request.models.len()
            )));
        }

        let families: std::collections::HashSet<String> = request
            .models
            .iter()
            .chain(std::iter::once(&request.judge_model))
            .map(|m| model_family(m))
            .collect();
        if families.len() < 3 {
            return Err(AppError::Validation(format!(
                "all three models must be from different LLM families, found: {:?}",
                families
            )));
        }

        if request.scenario_ids.is_empty() || request.role_ids.is_empty() {
            return Err(AppError::Validation(
                "please select at least one scenario and role".to_string(),
            ));
        }

        if request.num_iterations == 0 {
            return Err(AppError::Validation(
                "num_iterations must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    async fn execute(&self, job_id: &str, request: RunRequest, token: StopToken) {
        let config = RunConfig {
            models: request.models,
            scenarios: request.scenario_ids,
            roles: request.role_ids,
            num_iterations: request.num_iterations,
            temperature: request.temperature,
            judge_temperature: request.judge_temperature,
            max_tokens: request.max_tokens,
            judge_model: request.judge_model,
        };

        let total = config.models.len()
            * config.scenarios.len()
            * config.roles.len()
            * config.num_iterations as usize;

        self.registry.update(job_id, |mut status| {
            status.state = JobState::Running;
            status.total = total;
            status.message = "Starting experiment...".to_string();
            status
        });

        // Stop requested before any work started.
        if token.is_stopped() {
            self.registry.update(job_id, |mut status| {
                status.state = JobState::Stopped;
                status.message = "Experiment was stopped by user".to_string();
                status
            });
            self.forget_token(job_id);
            return;
        }

        let evaluator = Evaluator::new(
            self.client.clone(),
            config.judge_model.clone(),
            config.judge_temperature,
        );
        let runner = ExperimentRunner::new(
            self.client.clone(),
            evaluator,
            self.catalog.as_ref().clone(),
        );

        let registry = self.registry.clone();
        let progress_job_id = job_id.to_string();
        let mut on_progress = move |current: usize, total: usize, message: &str| {
            let message = message.to_string();
            // Only the progress fields change here; the state is owned
            // by the control plane (it may read `stopping` right now).
            registry.update(&progress_job_id, |mut status| {
                status.progress = percentage(current, total);
                status.current = current;
                status.total = total;
                status.message = message;
                status
            });
        };

        let result = runner
            .run_with_progress(config, &mut on_progress, &token)
            .await;

        match result {
            Ok(finished) => {
                let saved = self.store.save(&finished.run);
                let (run_id, output_file) = match &saved {
                    Ok(path) => (
                        Some(finished.run.run_id.clone()),
                        Some(path.display().to_string()),
                    ),
                    Err(e) => {
                        error!("保存结果失败 ({}): {}", job_id, e);
                        (Some(finished.run.run_id.clone()), None)
                    }
                };

                self.registry.update(job_id, |mut status| {
                    status.run_id = run_id.clone();
                    status.output_file = output_file.clone();
                    match &finished.outcome {
                        RunOutcome::Completed => {
                            status.state = JobState::Completed;
                            status.progress = 100;
                            status.current = status.total;
                            status.message = "Completed successfully".to_string();
                            status.error = None;
                        }
                        RunOutcome::Cancelled => {
                            status.state = JobState::Stopped;
                            status.message = "Experiment was stopped by user".to_string();
                        }
                        RunOutcome::Failed(e) => {
                            status.state = JobState::Error;
                            status.message = "Experiment failed".to_string();
                            status.error = Some(e.to_string());
                        }
                    }
                    if let Err(e) = &saved {
                        status.error = Some(format!("failed to save results: {}", e));
                    }
                    status
                });
            }
            Err(e) => {
                error!("实验任务失败 ({}): {}", job_id, e);
                self.registry.update(job_id, |mut status| {
                    status.state = JobState::Error;
                    status.message = "Experiment failed".to_string();
                    status.error = Some(e.to_string());
                    status
                });
            }
        }

        self.forget_token(job_id);
    }

    fn forget_token(&self, job_id: &str) {
        self.stop_tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ApiError;
    use crate::infrastructure::llm::mock::MockChatClient;
    use crate::infrastructure::llm::{ChatClient, ChatRequest};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    const JUDGE_JSON: &str = r#"{"rationality": 4, "comprehensiveness": 4, "analytical_depth": 4, "integrity": 4, "bias_mitigation": 4, "overall_justification": "fine"}"#;

    fn request() -> RunRequest {
        RunRequest {
            models: vec!["x/m1".to_string(), "y/m2".to_string()],
            judge_model: "z/judge".to_string(),
            scenario_ids: vec!["plant_investment".to_string()],
            role_ids: vec!["neutral".to_string()],
            num_iterations: 1,
            temperature: 0.1,
            judge_temperature: 0.0,
            max_tokens: 1000,
        }
    }

    fn manager_with(client: Arc<dyn ChatClient>, dir: &std::path::Path) -> JobManager {
        JobManager::new(client, Catalog::builtin(), ResultsStore::new(dir))
    }

    async fn wait_for<F: Fn(&JobStatus) -> bool>(
        manager: &JobManager,
        job_id: &str,
        pred: F,
    ) -> JobStatus {
        for _ in 0..1000 {
            if let Some(status) = manager.status(job_id) {
                if pred(&status) {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for job {}", job_id);
    }

    /// Client whose calls block until permits are released; replies
    /// alternate between a generation answer and valid judge JSON.
    struct GatedClient {
        gate: Semaphore,
        calls: AtomicUsize,
    }

    impl GatedClient {
        fn new() -> Self {
            Self {
                gate: Semaphore::new(0),
                calls: AtomicUsize::new(0),
            }
        }

        fn release(&self, n: usize) {
            self.gate.add_permits(n);
        }
    }

    #[async_trait]
    impl ChatClient for GatedClient {
        async fn complete(&self, _request: &ChatRequest) -> Result<String, ApiError> {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| ApiError::Network("gate closed".to_string()))?;
            permit.forget();
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(if call % 2 == 0 {
                "Choice: Option A".to_string()
            } else {
                JUDGE_JSON.to_string()
            })
        }
    }

    #[test]
    fn test_rejects_fewer_than_three_model_families() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(Arc::new(MockChatClient::new()), dir.path());

        let mut bad = request();
        bad.judge_model = "x/judge".to_string();
        assert!(matches!(manager.start(bad), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_rejects_empty_selections() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(Arc::new(MockChatClient::new()), dir.path());

        let mut bad = request();
        bad.scenario_ids.clear();
        assert!(matches!(manager.start(bad), Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_job_runs_to_completion_and_persists() {
        let client = Arc::new(MockChatClient::new());
        for _ in 0..2 {
            client.push_ok("Choice: Option A");
            client.push_ok(JUDGE_JSON);
        }
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(client, dir.path());

        let job_id = manager.start(request()).unwrap();
        assert!(job_id.starts_with("exp_"));

        let status = wait_for(&manager, &job_id, |s| s.state == JobState::Completed).await;
        assert_eq!(status.progress, 100);
        assert_eq!(status.current, 2);
        assert_eq!(status.total, 2);
        let run_id = status.run_id.unwrap();
        let output = status.output_file.unwrap();
        assert!(std::path::Path::new(&output).exists());

        let summaries = manager.list().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].run_id, run_id);
        assert_eq!(summaries[0].num_responses, 2);

        let results = manager.results(&run_id).unwrap();
        assert_eq!(results.results.len(), 2);
        assert_eq!(results.results[0].choice, "A");

        let key = &results.results[0].id;
        let detail = manager.response_detail(&run_id, key).unwrap();
        assert_eq!(detail.choice, "A");
        assert!(detail.evaluation.is_some());
    }

    #[tokio::test]
    async fn test_single_job_slot_and_stop_flow() {
        let client = Arc::new(GatedClient::new());
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(client.clone(), dir.path());

        let job_id = manager.start(request()).unwrap();
        wait_for(&manager, &job_id, |s| s.state == JobState::Running).await;

        // The single run slot is taken.
        assert!(matches!(
            manager.start(request()),
            Err(AppError::Validation(_))
        ));

        manager.stop(&job_id).unwrap();
        let status = manager.status(&job_id).unwrap();
        assert_eq!(status.state, JobState::Stopping);

        // A second stop is rejected while stopping.
        assert!(matches!(
            manager.stop(&job_id),
            Err(AppError::Validation(_))
        ));

        // Let the in-flight generation finish; the orchestrator then
        // observes the stop and finalizes without evaluating the unit.
        client.release(10);
        let status = wait_for(&manager, &job_id, |s| s.state == JobState::Stopped).await;
        assert_eq!(status.message, "Experiment was stopped by user");

        let run_id = status.run_id.unwrap();
        let run = manager.store().load(&run_id).unwrap();
        assert!(run.responses.is_empty());

        // The slot is free again.
        let second = manager.start(request()).unwrap();
        wait_for(&manager, &second, |s| s.state == JobState::Running).await;
        manager.stop(&second).unwrap();
        client.release(10);
        wait_for(&manager, &second, |s| s.state == JobState::Stopped).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_simultaneous_starts_admit_exactly_one_job() {
        let client = Arc::new(GatedClient::new());
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(client.clone(), dir.path());

        let barrier = Arc::new(tokio::sync::Barrier::new(4));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let manager = manager.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                manager.start(request())
            }));
        }

        let mut accepted = Vec::new();
        for handle in handles {
            if let Ok(job_id) = handle.await.unwrap() {
                accepted.push(job_id);
            }
        }
        assert_eq!(accepted.len(), 1);
        assert!(manager.status(&accepted[0]).unwrap().state.is_active());
    }

    #[tokio::test]
    async fn test_generation_failure_surfaces_error_status() {
        let client = Arc::new(MockChatClient::new());
        client.push_ok("Choice: Option A");
        client.push_ok(JUDGE_JSON);
        client.push_err(ApiError::NetworkExhausted {
            attempts: 3,
            cause: "connection reset".to_string(),
        });
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(client, dir.path());

        let job_id = manager.start(request()).unwrap();
        let status = wait_for(&manager, &job_id, |s| s.state == JobState::Error).await;

        assert!(status.error.unwrap().contains("connection reset"));
        // Responses accumulated before the failure are persisted.
        let run_id = status.run_id.unwrap();
        let run = manager.store().load(&run_id).unwrap();
        assert_eq!(run.responses.len(), 1);
    }

    #[test]
    fn test_stop_unknown_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(Arc::new(MockChatClient::new()), dir.path());
        assert!(matches!(
            manager.stop("exp_nope"),
            Err(AppError::NotFound(_))
        ));
        assert!(manager.status("exp_nope").is_none());
    }
}
