use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::LlmRequestError;
use crate::types::{LlmAnalysis, LlmRiskLevel, SuggestedAction};

/// Structured reply exactly as the model must produce it. Unknown enum strings fail to parse.
#[derive(Debug, Deserialize)]
struct RawAssessment {
    risk_level: LlmRiskLevel,
    explanation: String,
    suggested_action: SuggestedAction,
    confidence_score: f64,
    #[serde(default)]
    risk_factors: Vec<String>,
    #[serde(default)]
    compliance_notes: Option<String>,
}

/// A validated model assessment, not yet attached to a flag.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmAssessment {
    pub risk_level: LlmRiskLevel,
    pub explanation: String,
    pub suggested_action: SuggestedAction,
    pub confidence_score: f64,
    pub risk_factors: Vec<String>,
    pub compliance_notes: Option<String>,
}

impl LlmAssessment {
    pub fn into_analysis(self, model_used: &str, analyzed_at: DateTime<Utc>) -> LlmAnalysis {
        LlmAnalysis {
            risk_level: self.risk_level,
            explanation: self.explanation,
            suggested_action: self.suggested_action,
            confidence_score: self.confidence_score,
            risk_factors: self.risk_factors,
            compliance_notes: self.compliance_notes,
            model_used: model_used.to_string(),
            analyzed_at,
        }
    }
}

/// Parse and validate function-call arguments. Anything out of schema is `MalformedResponse`.
pub fn parse_assessment(
    arguments: &str,
    max_risk_factors: usize,
) -> Result<LlmAssessment, LlmRequestError> {
    let raw: RawAssessment = serde_json::from_str(arguments)
        .map_err(|e| LlmRequestError::MalformedResponse(format!("invalid arguments: {e}")))?;

    if !raw.confidence_score.is_finite() || !(0.0..=1.0).contains(&raw.confidence_score) {
        return Err(LlmRequestError::MalformedResponse(format!(
            "confidence_score {} outside [0.0, 1.0]",
            raw.confidence_score
        )));
    }

    let explanation = raw.explanation.trim().to_string();
    if explanation.is_empty() {
        return Err(LlmRequestError::MalformedResponse(
            "explanation is empty".to_string(),
        ));
    }

    if raw.risk_factors.len() > max_risk_factors {
        return Err(LlmRequestError::MalformedResponse(format!(
            "{} risk factors exceeds limit of {}",
            raw.risk_factors.len(),
            max_risk_factors
        )));
    }
    let risk_factors: Vec<String> = raw
        .risk_factors
        .iter()
        .map(|f| f.trim().to_string())
        .collect();
    if risk_factors.iter().any(String::is_empty) {
        return Err(LlmRequestError::MalformedResponse(
            "risk factor is empty".to_string(),
        ));
    }

    Ok(LlmAssessment {
        risk_level: raw.risk_level,
        explanation,
        suggested_action: raw.suggested_action,
        confidence_score: raw.confidence_score,
        risk_factors,
        compliance_notes: raw
            .compliance_notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<LlmAssessment, LlmRequestError> {
        parse_assessment(json, 10)
    }

    #[test]
    fn test_valid_reply() {
        let assessment = parse(
            r#"{
                "risk_level": "High",
                "explanation": "Large cash withdrawal at 03:24 by a low-risk customer.",
                "suggested_action": "escalate",
                "confidence_score": 0.87,
                "risk_factors": ["off-hours", "cash"],
                "compliance_notes": "Consider a CTR."
            }"#,
        )
        .unwrap();
        assert_eq!(assessment.risk_level, LlmRiskLevel::High);
        assert_eq!(assessment.suggested_action, SuggestedAction::Escalate);
        assert_eq!(assessment.risk_factors, vec!["off-hours", "cash"]);
    }

    #[test]
    fn test_optional_fields_default() {
        let assessment = parse(
            r#"{"risk_level":"Low","explanation":"Routine.","suggested_action":"ignore","confidence_score":1.0}"#,
        )
        .unwrap();
        assert!(assessment.risk_factors.is_empty());
        assert!(assessment.compliance_notes.is_none());
    }

    #[test]
    fn test_out_of_schema_replies_are_rejected() {
        let cases = [
            // Unknown action
            r#"{"risk_level":"High","explanation":"x","suggested_action":"manual_review","confidence_score":0.5}"#,
            // Wrong case
            r#"{"risk_level":"high","explanation":"x","suggested_action":"escalate","confidence_score":0.5}"#,
            // Confidence out of range
            r#"{"risk_level":"High","explanation":"x","suggested_action":"escalate","confidence_score":1.2}"#,
            // Confidence as string
            r#"{"risk_level":"High","explanation":"x","suggested_action":"escalate","confidence_score":"0.5"}"#,
            // Missing explanation
            r#"{"risk_level":"High","suggested_action":"escalate","confidence_score":0.5}"#,
            // Blank explanation
            r#"{"risk_level":"High","explanation":"  ","suggested_action":"escalate","confidence_score":0.5}"#,
            // Not JSON
            "the transaction looks risky",
        ];
        for case in cases {
            let err = parse(case).unwrap_err();
            assert!(
                matches!(err, LlmRequestError::MalformedResponse(_)),
                "accepted: {case}"
            );
        }
    }

    #[test]
    fn test_risk_factor_limit() {
        let json = r#"{"risk_level":"Medium","explanation":"x","suggested_action":"monitor","confidence_score":0.4,"risk_factors":["a","b","c"]}"#;
        assert!(parse_assessment(json, 3).is_ok());
        assert!(parse_assessment(json, 2).is_err());
    }
}
