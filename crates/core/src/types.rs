use serde::{Deserialize, Serialize};

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier assigned to every merged inference result and queued job.
pub type InferenceId = uuid::Uuid;

/// Severity ladder shared by the acne and wrinkle calculators.
///
/// Serialized with the capitalised names downstream consumers already
/// expect (`"None"`, `"Mild"`, `"Moderate"`, `"Severe"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    None,
    Mild,
    Moderate,
    Severe,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::None => "None",
            Severity::Mild => "Mild",
            Severity::Moderate => "Moderate",
            Severity::Severe => "Severe",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment environment, from `APP_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppEnv {
    #[default]
    Development,
    Production,
    Test,
}

impl AppEnv {
    /// Parse an `APP_ENV` value. Unknown values mean development.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => AppEnv::Production,
            "test" => AppEnv::Test,
            _ => AppEnv::Development,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppEnv::Development => "development",
            AppEnv::Production => "production",
            AppEnv::Test => "test",
        }
    }

    pub fn is_production(self) -> bool {
        self == AppEnv::Production
    }
}

/// Round to two decimal places, the precision every percentage is reported with.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_env_parses_known_values_and_defaults_to_development() {
        assert_eq!(AppEnv::parse("production"), AppEnv::Production);
        assert_eq!(AppEnv::parse(" PROD "), AppEnv::Production);
        assert_eq!(AppEnv::parse("test"), AppEnv::Test);
        assert_eq!(AppEnv::parse("staging"), AppEnv::Development);
        assert_eq!(AppEnv::parse(""), AppEnv::Development);
    }

    #[test]
    fn severity_serializes_capitalised() {
        let json = serde_json::to_string(&Severity::Moderate).unwrap();
        assert_eq!(json, "\"Moderate\"");
    }

    #[test]
    fn severity_orders_by_intensity() {
        assert!(Severity::None < Severity::Mild);
        assert!(Severity::Moderate < Severity::Severe);
    }

    #[test]
    fn round2_keeps_two_decimals() {
        assert_eq!(round2(4.0), 4.0);
        assert_eq!(round2(1.23456), 1.23);
        assert_eq!(round2(0.005_000_1), 0.01);
    }
}
