use chrono::Local;
use serde::{Deserialize, Serialize};

/// Rubric scores produced by the LLM-as-judge for a single response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationScores {
    pub rationality: f64,
    pub comprehensiveness: f64,
    pub analytical_depth: f64,
    pub integrity: f64,
    pub bias_mitigation: f64,
    pub overall_justification: String,
}

impl EvaluationScores {
    /// Arithmetic mean across the five rubric dimensions.
    pub fn average_score(&self) -> f64 {
        (self.rationality
            + self.comprehensiveness
            + self.analytical_depth
            + self.integrity
            + self.bias_mitigation)
            / 5.0
    }

    /// 评分失败时的中性回退值（评分量表中点 3.0）
    pub fn neutral(reason: &str) -> Self {
        Self {
            rationality: 3.0,
            comprehensiveness: 3.0,
            analytical_depth: 3.0,
            integrity: 3.0,
            bias_mitigation: 3.0,
            overall_justification: format!("Evaluation error: {}", reason),
        }
    }
}

/// One unit of work: a model's response for a (scenario, role, iteration)
/// combination, plus its judge evaluation once scored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentResponse {
    pub scenario_id: String,
    pub role_id: String,
    pub model: String,
    pub iteration: u32,
    pub prompt: String,
    pub response: String,
    pub evaluation: Option<EvaluationScores>,
    pub timestamp: String,
}

impl ExperimentResponse {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scenario_id: String,
        role_id: String,
        model: String,
        iteration: u32,
        prompt: String,
        response: String,
        evaluation: Option<EvaluationScores>,
    ) -> Self {
        Self {
            scenario_id,
            role_id,
            model,
            iteration,
            prompt,
            response,
            evaluation,
            timestamp: Local::now().to_rfc3339(),
        }
    }

    /// Unique key within a run: `scenario_role_model_iteration`.
    pub fn response_key(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.scenario_id, self.role_id, self.model, self.iteration
        )
    }
}

/// Snapshot of the settings a run was executed with, stamped into the
/// run record so results are self-describing and reproducible.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    pub models: Vec<String>,
    pub scenarios: Vec<String>,
    pub roles: Vec<String>,
    pub num_iterations: u32,
    pub temperature: f64,
    pub judge_temperature: f64,
    pub max_tokens: u32,
    pub judge_model: String,
}

/// Complete experiment run with all responses, in traversal order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentRun {
    pub run_id: String,
    pub timestamp: String,
    pub config: RunConfig,
    pub responses: Vec<ExperimentResponse>,
}

/// 模型标识的家族前缀（`openai/gpt-4.1-mini` -> `openai`）
pub fn model_family(model: &str) -> String {
    model.split('/').next().unwrap_or(model).to_lowercase()
}

/// 模型标识的短名（`openai/gpt-4.1-mini` -> `gpt-4.1-mini`）
pub fn short_model_name(model: &str) -> &str {
    model.rsplit('/').next().unwrap_or(model)
}
