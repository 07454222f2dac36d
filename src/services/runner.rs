use crate::core::cancel::StopToken;
use crate::core::error::{ApiError, AppError, AppResult};
use crate::core::models::{short_model_name, ExperimentResponse, ExperimentRun, RunConfig};
use crate::infrastructure::llm::{ChatClient, ChatRequest};
use crate::services::catalog::{Catalog, Role, Scenario};
use crate::services::evaluator::Evaluator;
use crate::services::extract::ScoreExtraction;
use chrono::Local;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// How a run ended. Cancellation is a normal terminal state, not an
/// error; a generation failure terminates the run but keeps everything
/// accumulated before it.
#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed(ApiError),
}

#[derive(Debug)]
pub struct FinishedRun {
    pub run: ExperimentRun,
    pub outcome: RunOutcome,
}

/// Progress callback: `(completed_units, total_units, message)`.
pub type ProgressFn<'a> = &'a mut (dyn FnMut(usize, usize, &str) + Send);

/// 实验编排器。在单个顺序 worker 上遍历
/// 模型 x 场景 x 角色 x 迭代 的笛卡尔积。
pub struct ExperimentRunner {
    client: Arc<dyn ChatClient>,
    evaluator: Evaluator,
    catalog: Catalog,
}

impl ExperimentRunner {
    pub fn new(client: Arc<dyn ChatClient>, evaluator: Evaluator, catalog: Catalog) -> Self {
        Self {
            client,
            evaluator,
            catalog,
        }
    }

    /// Role framing and scenario description, separated by a blank line.
    fn build_prompt(role: &Role, scenario: &Scenario) -> String {
        format!("{}\n\n{}", role.framing, scenario.description)
    }

    /// Runs the full matrix. The traversal order (models, then
    /// scenarios, then roles, then iterations 1..N) is what makes
    /// partial runs reproducible; do not reorder.
    pub async fn run_with_progress(
        &self,
        config: RunConfig,
        progress: ProgressFn<'_>,
        stop: &StopToken,
    ) -> AppResult<FinishedRun> {
        let scenarios = self.resolve_scenarios(&config)?;
        let roles = self.resolve_roles(&config)?;

        let run_id = Uuid::new_v4().to_string();
        let total =
            config.models.len() * scenarios.len() * roles.len() * config.num_iterations as usize;

        info!(
            "实验开始: run_id={}, 模型数={}, 场景数={}, 角色数={}, 迭代={}, 总单元数={}",
            run_id,
            config.models.len(),
            scenarios.len(),
            roles.len(),
            config.num_iterations,
            total
        );

        let mut responses: Vec<ExperimentResponse> = Vec::new();
        let mut completed = 0usize;
        let mut failure: Option<ApiError> = None;

        'matrix: for model in &config.models {
            if stop.is_stopped() {
                break 'matrix;
            }
            for scenario in &scenarios {
                if stop.is_stopped() {
                    break 'matrix;
                }
                for role in &roles {
                    if stop.is_stopped() {
                        break 'matrix;
                    }
                    let prompt = Self::build_prompt(role, scenario);

                    for iteration in 1..=config.num_iterations {
                        if stop.is_stopped() {
                            break 'matrix;
                        }

                        let request = ChatRequest::new(
                            model.clone(),
                            None,
                            prompt.clone(),
                            config.temperature,
                            config.max_tokens,
                        );
                        let response_text = match self.client.complete(&request).await {
                            Ok(text) => text,
                            Err(e) => {
                                // 生成失败不做中性回退：生成文本本身是研究对象
                                error!("生成调用失败 (model={}): {}", model, e);
                                failure = Some(e);
                                break 'matrix;
                            }
                        };

                        // A stop request observed mid-unit discards the
                        // half-finished unit; completed units are kept.
                        if stop.is_stopped() {
                            break 'matrix;
                        }

                        let extraction = self
                            .evaluator
                            .evaluate(
                                &scenario.name,
                                &scenario.description,
                                &role.name,
                                &response_text,
                            )
                            .await;
                        if let ScoreExtraction::Fallback { reason, .. } = &extraction {
                            warn!(
                                "评审回退为中性分 (scenario={}, role={}, iteration={}): {}",
                                scenario.id, role.id, iteration, reason
                            );
                        }

                        responses.push(ExperimentResponse::new(
                            scenario.id.clone(),
                            role.id.clone(),
                            model.clone(),
                            iteration,
                            prompt.clone(),
                            response_text,
                            Some(extraction.into_scores()),
                        ));

                        completed += 1;
                        progress(
                            completed,
                            total,
                            &format!(
                                "Model: {}, Scenario: {}, Role: {}, Iteration: {}",
                                short_model_name(model),
                                scenario.id,
                                role.id,
                                iteration
                            ),
                        );
                    }
                }
            }
        }

        let outcome = match failure {
            Some(e) => RunOutcome::Failed(e),
            None if stop.is_stopped() => RunOutcome::Cancelled,
            None => RunOutcome::Completed,
        };

        info!(
            "实验结束: run_id={}, 完成单元 {}/{}",
            run_id, completed, total
        );

        Ok(FinishedRun {
            run: ExperimentRun {
                run_id,
                timestamp: Local::now().to_rfc3339(),
                config,
                responses,
            },
            outcome,
        })
    }

    fn resolve_scenarios(&self, config: &RunConfig) -> AppResult<Vec<Scenario>> {
        config
            .scenarios
            .iter()
            .map(|id| {
                self.catalog
                    .scenario(id)
                    .cloned()
                    .ok_or_else(|| AppError::Validation(format!("unknown scenario id: {}", id)))
            })
            .collect()
    }

    fn resolve_roles(&self, config: &RunConfig) -> AppResult<Vec<Role>> {
        config
            .roles
            .iter()
            .map(|id| {
                self.catalog
                    .role(id)
                    .cloned()
                    .ok_or_else(|| AppError::Validation(format!("unknown role id: {}", id)))
            })
            .collect()
    }
}
