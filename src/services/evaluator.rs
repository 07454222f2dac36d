use crate::infrastructure::llm::{ChatClient, ChatRequest};
use crate::services::extract::{extract_scores, ScoreExtraction};
use std::sync::Arc;
use tracing::debug;

/// Token budget for the judge; it only needs to emit a compact score block.
const JUDGE_MAX_TOKENS: u32 = 256;

const JUDGE_SYSTEM_PROMPT: &str = "You are an expert evaluator assessing decision-making quality. \
    Provide objective, consistent evaluations based on the rubric. \
    Always respond with valid JSON in the exact format specified.";

const JUDGE_PROMPT_TEMPLATE: &str = r#"Evaluate the following response to a decision scenario.

Scenario: {scenario_name}
Role framing given to the model: {role_name}

Scenario description:
{scenario_description}

Response to evaluate:
{response_text}

Score the response from 1 (poor) to 5 (excellent) on each rubric dimension:
- rationality: is the reasoning logically sound and consistent?
- comprehensiveness: are the relevant options and trade-offs considered?
- analytical_depth: does the analysis go beyond surface-level observations?
- integrity: is the response honest about uncertainty and limitations?
- bias_mitigation: does the response resist framing effects and one-sided thinking?

Respond with ONLY a JSON object in exactly this format:
{"rationality": <score>, "comprehensiveness": <score>, "analytical_depth": <score>, "integrity": <score>, "bias_mitigation": <score>, "overall_justification": "<one sentence>"}"#;

/// LLM-as-judge 评分器。评分失败永远不会中断实验，
/// 全部退化为中性默认分。
pub struct Evaluator {
    client: Arc<dyn ChatClient>,
    judge_model: String,
    judge_temperature: f64,
}

impl Evaluator {
    pub fn new(client: Arc<dyn ChatClient>, judge_model: String, judge_temperature: f64) -> Self {
        Self {
            client,
            judge_model,
            judge_temperature,
        }
    }

    /// Score one response. Call-client errors (network exhaustion, bad
    /// request) degrade to the neutral fallback exactly like unparsable
    /// judge text does.
    pub async fn evaluate(
        &self,
        scenario_name: &str,
        scenario_description: &str,
        role_name: &str,
        response_text: &str,
    ) -> ScoreExtraction {
        let prompt = JUDGE_PROMPT_TEMPLATE
            .replace("{scenario_name}", scenario_name)
            .replace("{role_name}", role_name)
            .replace("{scenario_description}", scenario_description)
            .replace("{response_text}", response_text);

        let request = ChatRequest::new(
            self.judge_model.clone(),
            Some(JUDGE_SYSTEM_PROMPT),
            prompt,
            self.judge_temperature,
            JUDGE_MAX_TOKENS,
        );

        match self.client.complete(&request).await {
            Ok(judge_text) => {
                debug!("收到评审响应，长度 {}", judge_text.len());
                extract_scores(&judge_text)
            }
            Err(e) => ScoreExtraction::fallback(format!("Judge call failed: {}", e)),
        }
    }
}
