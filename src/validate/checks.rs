use serde::de::Error as _;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Axis keyword rules
// ---------------------------------------------------------------------------

/// A header keyword and the values it may hold. The first accepted value
/// is written when fixing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisRule {
    pub key: String,
    pub accepted: Vec<String>,
}

impl AxisRule {
    pub fn new(key: &str, accepted: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            accepted: accepted.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        self.accepted.iter().any(|a| a == value)
    }

    /// Value written by a fix.
    pub fn expected(&self) -> &str {
        self.accepted.first().map(String::as_str).unwrap_or_default()
    }

    /// `'RA---TAN'` for a single value, `one of [um, nm]` otherwise.
    pub fn describe(&self) -> String {
        match self.accepted.as_slice() {
            [single] => format!("'{single}'"),
            many => format!("one of [{}]", many.join(", ")),
        }
    }
}

// ---------------------------------------------------------------------------
// ValidatorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub axis_rules: Vec<AxisRule>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            axis_rules: vec![
                AxisRule::new("CTYPE1", &["RA---TAN"]),
                AxisRule::new("CTYPE2", &["DEC--TAN"]),
                AxisRule::new("CTYPE3", &["WAVE"]),
                AxisRule::new("CUNIT1", &["deg"]),
                AxisRule::new("CUNIT2", &["deg"]),
                AxisRule::new(
                    "CUNIT3",
                    &["um", "micron", "nm", "Angstrom", "A", "m", "cm", "mm"],
                ),
            ],
        }
    }
}

impl ValidatorConfig {
    /// Parse a rule set from JSON. Every rule needs at least one accepted
    /// value.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        if let Some(rule) = config.axis_rules.iter().find(|r| r.accepted.is_empty()) {
            return Err(serde_json::Error::custom(format!(
                "rule for {} accepts no values",
                rule.key
            )));
        }
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Check registry
// ---------------------------------------------------------------------------

/// One validation pass, run in registration order.
#[derive(Debug, Clone, PartialEq)]
pub enum Check {
    /// Every HDU needs an EXTNAME.
    ExtensionName,
    /// At least one HDU carries 3D data of a consistent shape.
    Data,
    /// Axis keywords of the primary and cube HDUs follow the rules.
    AxisKeywords(Vec<AxisRule>),
}

impl Check {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExtensionName => "extension name",
            Self::Data => "data",
            Self::AxisKeywords(_) => "axis keywords",
        }
    }
}

/// Default registration order.
pub fn registry(config: &ValidatorConfig) -> Vec<Check> {
    vec![
        Check::ExtensionName,
        Check::Data,
        Check::AxisKeywords(config.axis_rules.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules() {
        let config = ValidatorConfig::default();
        let keys: Vec<&str> = config.axis_rules.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["CTYPE1", "CTYPE2", "CTYPE3", "CUNIT1", "CUNIT2", "CUNIT3"]);

        let cunit3 = &config.axis_rules[5];
        assert_eq!(cunit3.expected(), "um");
        assert!(cunit3.matches("Angstrom"));
        assert!(!cunit3.matches("Hz"));
    }

    #[test]
    fn test_describe() {
        assert_eq!(AxisRule::new("CTYPE3", &["WAVE"]).describe(), "'WAVE'");
        assert_eq!(AxisRule::new("CUNIT3", &["um", "nm"]).describe(), "one of [um, nm]");
    }

    #[test]
    fn test_config_from_json() {
        let config = ValidatorConfig::from_json(
            r#"{"axis_rules": [{"key": "CTYPE3", "accepted": ["AWAV", "WAVE"]}]}"#,
        )
        .unwrap();
        assert_eq!(config.axis_rules.len(), 1);
        assert_eq!(config.axis_rules[0].expected(), "AWAV");
    }

    #[test]
    fn test_config_rejects_empty_rule() {
        let err = ValidatorConfig::from_json(r#"{"axis_rules": [{"key": "CTYPE3", "accepted": []}]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("CTYPE3"));
    }

    #[test]
    fn test_registry_order() {
        let names: Vec<&str> = registry(&ValidatorConfig::default())
            .iter()
            .map(Check::name)
            .collect();
        assert_eq!(names, ["extension name", "data", "axis keywords"]);
    }
}
