use crate::core::error::AppResult;
use crate::core::models::{short_model_name, EvaluationScores, ExperimentRun, RunConfig};
use crate::services::extract::extract_choice;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// One evaluated response flattened for tabular output. Responses
/// without an evaluation are omitted, matching the analysis view.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResultRow {
    pub id: String,
    pub scenario: String,
    pub role: String,
    pub model: String,
    pub full_model: String,
    pub iteration: u32,
    pub choice: String,
    pub rationality: f64,
    pub comprehensiveness: f64,
    pub analytical_depth: f64,
    pub integrity: f64,
    pub bias_mitigation: f64,
    pub average_score: f64,
    pub timestamp: String,
}

pub fn flatten_run(run: &ExperimentRun) -> Vec<ResultRow> {
    run.responses
        .iter()
        .filter_map(|response| {
            let evaluation = response.evaluation.as_ref()?;
            Some(ResultRow {
                id: response.response_key(),
                scenario: response.scenario_id.clone(),
                role: response.role_id.clone(),
                model: short_model_name(&response.model).to_string(),
                full_model: response.model.clone(),
                iteration: response.iteration,
                choice: extract_choice(&response.response),
                rationality: evaluation.rationality,
                comprehensiveness: evaluation.comprehensiveness,
                analytical_depth: evaluation.analytical_depth,
                integrity: evaluation.integrity,
                bias_mitigation: evaluation.bias_mitigation,
                average_score: evaluation.average_score(),
                timestamp: response.timestamp.clone(),
            })
        })
        .collect()
}

/// Whole-run analysis view: the run header plus the flattened table.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunResults {
    pub run_id: String,
    pub timestamp: String,
    pub config: RunConfig,
    pub results: Vec<ResultRow>,
}

pub fn run_results(run: &ExperimentRun) -> RunResults {
    RunResults {
        run_id: run.run_id.clone(),
        timestamp: run.timestamp.clone(),
        config: run.config.clone(),
        results: flatten_run(run),
    }
}

/// One response with its full prompt and raw text, for drill-down.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResponseDetail {
    pub id: String,
    pub scenario: String,
    pub role: String,
    pub model: String,
    pub full_model: String,
    pub iteration: u32,
    pub choice: String,
    pub prompt: String,
    pub response: String,
    pub evaluation: Option<EvaluationScores>,
    pub timestamp: String,
}

pub fn response_detail(run: &ExperimentRun, response_key: &str) -> Option<ResponseDetail> {
    run.responses
        .iter()
        .find(|response| response.response_key() == response_key)
        .map(|response| ResponseDetail {
            id: response.response_key(),
            scenario: response.scenario_id.clone(),
            role: response.role_id.clone(),
            model: short_model_name(&response.model).to_string(),
            full_model: response.model.clone(),
            iteration: response.iteration,
            choice: extract_choice(&response.response),
            prompt: response.prompt.clone(),
            response: response.response.clone(),
            evaluation: response.evaluation.clone(),
            timestamp: response.timestamp.clone(),
        })
}

pub fn write_csv(run: &ExperimentRun, path: &Path) -> AppResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in flatten_run(run) {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// 按 (场景, 角色, 模型) 汇总平均分，用于运行结束后的摘要输出。
pub fn summary_lines(run: &ExperimentRun) -> Vec<String> {
    let mut grouped: BTreeMap<(String, String, String), Vec<f64>> = BTreeMap::new();
    for response in &run.responses {
        if let Some(evaluation) = &response.evaluation {
            grouped
                .entry((
                    response.scenario_id.clone(),
                    response.role_id.clone(),
                    response.model.clone(),
                ))
                .or_default()
                .push(evaluation.average_score());
        }
    }

    grouped
        .into_iter()
        .map(|((scenario, role, model), scores)| {
            let avg = scores.iter().sum::<f64>() / scores.len() as f64;
            format!(
                "{:<20} | {:<20} | {:<20} | Avg: {:.2}",
                truncate(&scenario, 20),
                truncate(&role, 20),
                truncate(short_model_name(&model), 20),
                avg
            )
        })
        .collect()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{EvaluationScores, ExperimentResponse, RunConfig};

    fn scores(value: f64) -> EvaluationScores {
        EvaluationScores {
            rationality: value,
            comprehensiveness: value,
            analytical_depth: value,
            integrity: value,
            bias_mitigation: value,
            overall_justification: "ok".to_string(),
        }
    }

    fn sample_run() -> ExperimentRun {
        let mut responses = vec![
            ExperimentResponse::new(
                "plant_investment".to_string(),
                "neutral".to_string(),
                "x/m1".to_string(),
                1,
                "prompt".to_string(),
                "Choice: Option B".to_string(),
                Some(scores(4.0)),
            ),
            ExperimentResponse::new(
                "plant_investment".to_string(),
                "neutral".to_string(),
                "x/m1".to_string(),
                2,
                "prompt".to_string(),
                "Choice: Option A".to_string(),
                Some(scores(2.0)),
            ),
        ];
        // Unevaluated responses stay out of the table.
        responses.push(ExperimentResponse::new(
            "plant_investment".to_string(),
            "neutral".to_string(),
            "x/m1".to_string(),
            3,
            "prompt".to_string(),
            "Choice: Option C".to_string(),
            None,
        ));

        ExperimentRun {
            run_id: "run-1".to_string(),
            timestamp: "2026-08-27T10:00:00+00:00".to_string(),
            config: RunConfig {
                models: vec!["x/m1".to_string()],
                scenarios: vec!["plant_investment".to_string()],
                roles: vec!["neutral".to_string()],
                num_iterations: 3,
                temperature: 0.1,
                judge_temperature: 0.0,
                max_tokens: 1000,
                judge_model: "z/judge".to_string(),
            },
            responses,
        }
    }

    #[test]
    fn test_flatten_extracts_choice_and_average() {
        let rows = flatten_run(&sample_run());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "plant_investment_neutral_x/m1_1");
        assert_eq!(rows[0].choice, "B");
        assert_eq!(rows[0].model, "m1");
        assert_eq!(rows[0].full_model, "x/m1");
        assert_eq!(rows[0].average_score, 4.0);
        assert_eq!(rows[1].choice, "A");
    }

    #[test]
    fn test_write_csv_produces_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.csv");
        write_csv(&sample_run(), &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("id,scenario,role,model,full_model,iteration,choice"));
        assert_eq!(lines.count(), 2);
    }

    #[test]
    fn test_response_detail_lookup() {
        let run = sample_run();
        let detail = response_detail(&run, "plant_investment_neutral_x/m1_2").unwrap();
        assert_eq!(detail.choice, "A");
        assert_eq!(detail.response, "Choice: Option A");
        assert!(detail.evaluation.is_some());
        assert!(response_detail(&run, "nope").is_none());

        let results = run_results(&run);
        assert_eq!(results.run_id, "run-1");
        assert_eq!(results.results.len(), 2);
    }

    #[test]
    fn test_summary_groups_by_combination() {
        let lines = summary_lines(&sample_run());
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("plant_investment"));
        assert!(lines[0].contains("Avg: 3.00"));
    }
}
