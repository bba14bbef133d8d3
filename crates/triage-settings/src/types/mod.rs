//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so partial JSON
//! files are accepted and missing fields keep their compiled default.

mod analysis;
mod auth;
mod server;

pub use analysis::*;
pub use auth::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "auth": { "tokens": { "tok_abc": "alice" } },
///   "analysis": { "stageDelayMs": 250 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriageSettings {
    /// Network, connection and heartbeat settings.
    pub server: ServerSettings,
    /// Handshake identity settings.
    pub auth: AuthSettings,
    /// Analysis run settings.
    pub analysis: AnalysisSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl TriageSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.server.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalMs must be positive".into(),
            ));
        }
        if self.server.heartbeat_timeout_ms < self.server.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(format!(
                "server.heartbeatTimeoutMs ({}) must be >= heartbeatIntervalMs ({})",
                self.server.heartbeat_timeout_ms, self.server.heartbeat_interval_ms
            )));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueueCapacity must be positive".into(),
            ));
        }
        if !(1..=MAX_STAGES).contains(&self.analysis.stages) {
            return Err(SettingsError::InvalidValue(format!(
                "analysis.stages must be within 1..={MAX_STAGES}, got {}",
                self.analysis.stages
            )));
        }
        if self.analysis.default_language.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "analysis.defaultLanguage must not be empty".into(),
            ));
        }
        if self
            .auth
            .trusted_header
            .as_deref()
            .is_some_and(|h| h.trim().is_empty())
        {
            return Err(SettingsError::InvalidValue(
                "auth.trustedHeader must not be blank".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn partial_json_fills_defaults() {
        let settings: TriageSettings =
            serde_json::from_str(r#"{"server":{"port":9000}}"#).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.analysis.stages, 3);
    }

    #[test]
    fn camel_case_keys() {
        let json = serde_json::to_value(TriageSettings::default()).unwrap();
        assert!(json["server"].get("maxConnections").is_some());
        assert!(json["analysis"].get("stageDelayMs").is_some());
        assert!(json["auth"].get("unauthenticatedReply").is_some());
    }

    #[test]
    fn timeout_below_interval_rejected() {
        let mut settings = TriageSettings::default();
        settings.server.heartbeat_interval_ms = 10_000;
        settings.server.heartbeat_timeout_ms = 5_000;
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn zero_stages_rejected() {
        let mut settings = TriageSettings::default();
        settings.analysis.stages = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn too_many_stages_rejected() {
        let mut settings = TriageSettings::default();
        settings.analysis.stages = MAX_STAGES + 1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn blank_trusted_header_rejected() {
        let mut settings = TriageSettings::default();
        settings.auth.trusted_header = Some(" ".into());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_queue_rejected() {
        let mut settings = TriageSettings::default();
        settings.server.send_queue_capacity = 0;
        assert!(settings.validate().is_err());
    }
}
