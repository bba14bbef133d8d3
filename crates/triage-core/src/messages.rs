//! Inbound client messages.
//!
//! Frames use the same envelope as outbound events:
//!
//! ```json
//! {"event": "start_analysis", "data": {"symptoms": "headache", "language": "english"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Result, TriageError};

/// Language used when a request does not name one.
pub const DEFAULT_LANGUAGE: &str = "english";

/// A decoded inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    /// Begin a symptom analysis run.
    StartAnalysis(StartAnalysisParams),
}

/// Raw `start_analysis` fields; both are optional on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartAnalysisParams {
    /// Free-form symptom description.
    pub symptoms: Option<String>,
    /// Language tag for the analysis.
    pub language: Option<String>,
}

/// Parameters handed to the analysis collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Free-form symptom description.
    pub symptoms: String,
    /// Language tag for the analysis.
    pub language: String,
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

impl ClientMessage {
    /// Decode a text frame.
    pub fn parse(text: &str) -> Result<Self> {
        let frame: RawFrame = serde_json::from_str(text)
            .map_err(|e| TriageError::InvalidMessage(format!("invalid JSON frame: {e}")))?;
        match frame.event.as_str() {
            "start_analysis" => {
                let params = if frame.data.is_null() {
                    StartAnalysisParams::default()
                } else {
                    serde_json::from_value(frame.data).map_err(|e| {
                        TriageError::InvalidMessage(format!("invalid start_analysis data: {e}"))
                    })?
                };
                Ok(Self::StartAnalysis(params))
            }
            other => Err(TriageError::InvalidMessage(format!(
                "unknown event '{other}'"
            ))),
        }
    }

    /// Wire name of the message.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartAnalysis(_) => "start_analysis",
        }
    }
}

impl StartAnalysisParams {
    /// Fill defaults: empty symptoms, `default_language` when absent.
    #[must_use]
    pub fn into_request(self, default_language: &str) -> AnalysisRequest {
        AnalysisRequest {
            symptoms: self.symptoms.unwrap_or_default(),
            language: self
                .language
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| default_language.to_string()),
        }
    }
}

impl AnalysisRequest {
    /// Build a request directly.
    pub fn new(symptoms: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            symptoms: symptoms.into(),
            language: language.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parse_full_request() {
        let msg = ClientMessage::parse(
            r#"{"event":"start_analysis","data":{"symptoms":"fever","language":"spanish"}}"#,
        )
        .unwrap();
        let ClientMessage::StartAnalysis(params) = msg;
        let req = params.into_request(DEFAULT_LANGUAGE);
        assert_eq!(req.symptoms, "fever");
        assert_eq!(req.language, "spanish");
    }

    #[test]
    fn language_defaults_when_absent() {
        let msg =
            ClientMessage::parse(r#"{"event":"start_analysis","data":{"symptoms":"cough"}}"#)
                .unwrap();
        let ClientMessage::StartAnalysis(params) = msg;
        assert_eq!(params.into_request(DEFAULT_LANGUAGE).language, "english");
    }

    #[test]
    fn missing_data_uses_defaults() {
        let msg = ClientMessage::parse(r#"{"event":"start_analysis"}"#).unwrap();
        assert_eq!(msg.name(), "start_analysis");
        let ClientMessage::StartAnalysis(params) = msg;
        let req = params.into_request("german");
        assert_eq!(req.symptoms, "");
        assert_eq!(req.language, "german");
    }

    #[test]
    fn blank_language_uses_default() {
        let params = StartAnalysisParams {
            symptoms: Some("x".into()),
            language: Some("  ".into()),
        };
        assert_eq!(params.into_request(DEFAULT_LANGUAGE).language, "english");
    }

    #[test]
    fn unknown_event_rejected() {
        let err = ClientMessage::parse(r#"{"event":"stop_analysis"}"#).unwrap_err();
        assert_matches!(err, TriageError::InvalidMessage(ref m) if m.contains("stop_analysis"));
    }

    #[test]
    fn invalid_json_rejected() {
        let err = ClientMessage::parse("not json").unwrap_err();
        assert_matches!(err, TriageError::InvalidMessage(_));
    }

    #[test]
    fn wrong_field_type_rejected() {
        let err = ClientMessage::parse(r#"{"event":"start_analysis","data":{"symptoms":5}}"#)
            .unwrap_err();
        assert_matches!(err, TriageError::InvalidMessage(_));
    }
}
