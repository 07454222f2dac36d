use crate::core::models::EvaluationScores;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Judge output is free text; locate the embedded JSON object with a
/// three-stage cascade, most specific first.
static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fenced json pattern"));
/// Balanced braces allowing one level of nesting. Deeper nesting can
/// mis-extract; the greedy stage below is the last resort for that.
static BALANCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[^{}]*(?:\{[^{}]*\}[^{}]*)*\}").expect("balanced json pattern"));
static GREEDY_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("greedy json pattern"));

static CHOICE_DECLARATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Choice:\s*Option\s+([A-D])").expect("choice pattern"));
static CHOICE_PAREN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b([A-D])\s*\)").expect("paren pattern"));
static CHOICE_VERB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:option|choice|select|answer|decision|recommendation|choose)\s+([A-D])")
        .expect("verb pattern")
});

const REQUIRED_FIELDS: [&str; 5] = [
    "rationality",
    "comprehensiveness",
    "analytical_depth",
    "integrity",
    "bias_mitigation",
];

/// Outcome of score extraction. Extraction never fails: either the judge
/// text parsed cleanly, or the neutral default stands in and the reason
/// says why.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreExtraction {
    Parsed(EvaluationScores),
    Fallback {
        scores: EvaluationScores,
        reason: String,
    },
}

impl ScoreExtraction {
    pub fn into_scores(self) -> EvaluationScores {
        match self {
            ScoreExtraction::Parsed(scores) => scores,
            ScoreExtraction::Fallback { scores, .. } => scores,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ScoreExtraction::Fallback { .. })
    }

    pub fn fallback(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        ScoreExtraction::Fallback {
            scores: EvaluationScores::neutral(&reason),
            reason,
        }
    }
}

/// Extract a five-dimension evaluation from raw judge text.
pub fn extract_scores(raw: &str) -> ScoreExtraction {
    match parse_scores(raw) {
        Ok(scores) => ScoreExtraction::Parsed(scores),
        Err(reason) => ScoreExtraction::fallback(reason),
    }
}

fn parse_scores(raw: &str) -> Result<EvaluationScores, String> {
    if raw.trim().is_empty() {
        return Err("Empty response from judge model".to_string());
    }

    let json_text =
        extract_json(raw).ok_or_else(|| "Could not extract JSON from judge response".to_string())?;

    let value: Value = serde_json::from_str(&json_text)
        .map_err(|e| format!("Invalid JSON in judge response: {}", e))?;

    let missing: Vec<&str> = REQUIRED_FIELDS
        .iter()
        .filter(|field| value.get(**field).is_none())
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(format!(
            "Missing required fields in evaluation: {:?}",
            missing
        ));
    }

    Ok(EvaluationScores {
        rationality: score_field(&value, "rationality")?,
        comprehensiveness: score_field(&value, "comprehensiveness")?,
        analytical_depth: score_field(&value, "analytical_depth")?,
        integrity: score_field(&value, "integrity")?,
        bias_mitigation: score_field(&value, "bias_mitigation")?,
        overall_justification: value
            .get("overall_justification")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

/// Judges occasionally quote their numbers; accept both forms.
fn score_field(value: &Value, field: &str) -> Result<f64, String> {
    let raw = value
        .get(field)
        .ok_or_else(|| format!("Missing field '{}'", field))?;
    raw.as_f64()
        .or_else(|| raw.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| format!("Non-numeric value for field '{}'", field))
}

/// JSON span location: fenced code block, then one-level balanced
/// braces, then the widest `{...}` span.
fn extract_json(text: &str) -> Option<String> {
    if let Some(captures) = FENCED_JSON.captures(text) {
        return Some(captures[1].to_string());
    }
    if let Some(matched) = BALANCED_JSON.find(text) {
        return Some(matched.as_str().to_string());
    }
    GREEDY_JSON.find(text).map(|m| m.as_str().to_string())
}

/// Extract the selected option label (A-D) from a model response.
/// Returns an empty string when no pattern matches; callers treat that
/// as "unparsed", not as an error.
pub fn extract_choice(raw: &str) -> String {
    let text = raw.trim();
    if text.is_empty() {
        return String::new();
    }

    for pattern in [&*CHOICE_DECLARATION, &*CHOICE_PAREN, &*CHOICE_VERB] {
        if let Some(captures) = pattern.captures(text) {
            return captures[1].to_uppercase();
        }
    }

    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_JUDGE_JSON: &str = r#"{"rationality": 4, "comprehensiveness": 3.5, "analytical_depth": 4, "integrity": 5, "bias_mitigation": 2.5, "overall_justification": "solid reasoning"}"#;

    fn assert_neutral(extraction: &ScoreExtraction) {
        match extraction {
            ScoreExtraction::Fallback { scores, .. } => {
                assert_eq!(scores.rationality, 3.0);
                assert_eq!(scores.comprehensiveness, 3.0);
                assert_eq!(scores.analytical_depth, 3.0);
                assert_eq!(scores.integrity, 3.0);
                assert_eq!(scores.bias_mitigation, 3.0);
            }
            ScoreExtraction::Parsed(_) => panic!("expected fallback"),
        }
    }

    #[test]
    fn test_extracts_from_fenced_code_block() {
        let raw = format!("Here is my evaluation:\n```json\n{}\n```\nDone.", VALID_JUDGE_JSON);
        match extract_scores(&raw) {
            ScoreExtraction::Parsed(scores) => {
                assert_eq!(scores.rationality, 4.0);
                assert_eq!(scores.overall_justification, "solid reasoning");
                assert!((scores.average_score() - 3.8).abs() < 1e-9);
            }
            other => panic!("expected parsed scores, got {:?}", other),
        }
    }

    #[test]
    fn test_extracts_from_untagged_fence() {
        let raw = format!("```\n{}\n```", VALID_JUDGE_JSON);
        assert!(!extract_scores(&raw).is_fallback());
    }

    #[test]
    fn test_extracts_bare_object_with_one_nested_level() {
        let raw = r#"Scores follow {"rationality": 1, "comprehensiveness": 2, "analytical_depth": 3, "integrity": 4, "bias_mitigation": 5, "detail": {"note": "nested"}} end"#;
        match extract_scores(raw) {
            ScoreExtraction::Parsed(scores) => {
                assert_eq!(scores.bias_mitigation, 5.0);
                assert_eq!(scores.overall_justification, "");
            }
            other => panic!("expected parsed scores, got {:?}", other),
        }
    }

    #[test]
    fn test_average_invariant_under_field_ordering() {
        let reordered = r#"{"bias_mitigation": 2.5, "integrity": 5, "analytical_depth": 4, "comprehensiveness": 3.5, "rationality": 4}"#;
        let a = extract_scores(VALID_JUDGE_JSON).into_scores();
        let b = extract_scores(reordered).into_scores();
        assert_eq!(a.average_score(), b.average_score());
    }

    #[test]
    fn test_numeric_strings_are_accepted() {
        let raw = r#"{"rationality": "4", "comprehensiveness": "3", "analytical_depth": "4", "integrity": "5", "bias_mitigation": "2"}"#;
        let scores = extract_scores(raw).into_scores();
        assert_eq!(scores.integrity, 5.0);
    }

    #[test]
    fn test_empty_text_falls_back_to_neutral() {
        let extraction = extract_scores("   \n  ");
        assert_neutral(&extraction);
        match extraction {
            ScoreExtraction::Fallback { reason, .. } => {
                assert!(reason.contains("Empty response"));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_no_json_falls_back_to_neutral() {
        let extraction = extract_scores("The response was generally reasonable.");
        assert_neutral(&extraction);
    }

    #[test]
    fn test_malformed_json_falls_back_to_neutral() {
        let extraction = extract_scores(r#"{"rationality": 4, "comprehensiveness"#);
        assert_neutral(&extraction);
    }

    #[test]
    fn test_missing_fields_fall_back_with_named_fields() {
        let extraction = extract_scores(r#"{"rationality": 4, "integrity": 5}"#);
        assert_neutral(&extraction);
        match extraction {
            ScoreExtraction::Fallback { reason, scores } => {
                assert!(reason.contains("comprehensiveness"));
                assert!(scores.overall_justification.contains("Missing required fields"));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_non_numeric_field_falls_back() {
        let raw = r#"{"rationality": "high", "comprehensiveness": 3, "analytical_depth": 3, "integrity": 3, "bias_mitigation": 3}"#;
        let extraction = extract_scores(raw);
        assert_neutral(&extraction);
    }

    #[test]
    fn test_choice_declaration_format() {
        assert_eq!(extract_choice("Choice: Option B"), "B");
        assert_eq!(extract_choice("After weighing things.\nchoice: option d"), "D");
    }

    #[test]
    fn test_choice_paren_format() {
        assert_eq!(extract_choice("I would go with C) because it hedges risk."), "C");
    }

    #[test]
    fn test_choice_verb_format() {
        assert_eq!(extract_choice("I recommend option C"), "C");
        assert_eq!(extract_choice("My final answer B is the safest."), "B");
    }

    #[test]
    fn test_unparsed_choice_is_empty() {
        assert_eq!(extract_choice("no clear answer here"), "");
        assert_eq!(extract_choice(""), "");
    }
}
