//! Interception options.
//!
//! Options come from code, from the environment, or (with the `config`
//! feature) from a JSON document.

use std::env;
#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};

use crate::error::{InterceptError, InterceptResult};

/// Environment variable selecting the validation mode (`strict` or `lenient`).
pub const VALIDATION_ENV: &str = "FERROUS_INTERCEPT_VALIDATION";

/// Environment variable enabling plan logging (`1`, `true`, `yes`, `on`).
pub const LOG_PLANS_ENV: &str = "FERROUS_INTERCEPT_LOG_PLANS";

/// How a marker whose capability does not fit its member's return shape is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "lowercase"))]
pub enum ValidationMode {
    /// Keep the marker as metadata and leave it out of the chain
    #[default]
    Lenient,
    /// Fail planning with `ShapeMismatch`
    Strict,
}

impl std::str::FromStr for ValidationMode {
    type Err = InterceptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(ValidationMode::Lenient),
            "strict" => Ok(ValidationMode::Strict),
            other => Err(InterceptError::Config(format!(
                "unknown validation mode '{}' (expected 'strict' or 'lenient')",
                other
            ))),
        }
    }
}

/// Options for a [`ProxyPlanner`](crate::ProxyPlanner).
///
/// # Examples
///
/// ```rust
/// use ferrous_intercept::{InterceptionOptions, ValidationMode};
///
/// let options = InterceptionOptions::default().strict();
/// assert_eq!(options.validation, ValidationMode::Strict);
/// assert!(!options.log_plans);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct InterceptionOptions {
    /// Treatment of markers that cannot run on their member
    pub validation: ValidationMode,
    /// Attach a [`LoggingObserver`](crate::LoggingObserver) to the planner
    pub log_plans: bool,
}

impl InterceptionOptions {
    /// Switches to [`ValidationMode::Strict`].
    pub fn strict(mut self) -> Self {
        self.validation = ValidationMode::Strict;
        self
    }

    /// Enables plan logging.
    pub fn with_plan_logging(mut self) -> Self {
        self.log_plans = true;
        self
    }

    /// Reads options from the process environment; unset variables keep defaults.
    pub fn from_env() -> InterceptResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads options through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> InterceptResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();
        if let Some(value) = lookup(VALIDATION_ENV) {
            options.validation = value.parse()?;
        }
        if let Some(value) = lookup(LOG_PLANS_ENV) {
            options.log_plans = parse_flag(&value)?;
        }
        Ok(options)
    }

    /// Parses options from JSON; missing fields keep defaults.
    #[cfg(feature = "config")]
    pub fn from_json(json: &str) -> InterceptResult<Self> {
        serde_json::from_str(json).map_err(|e| InterceptError::Config(e.to_string()))
    }
}

fn parse_flag(value: &str) -> InterceptResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(InterceptError::Config(format!(
            "invalid boolean '{}' for {}",
            other, LOG_PLANS_ENV
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_lenient_and_quiet() {
        let options = InterceptionOptions::from_lookup(lookup(&[])).unwrap();
        assert_eq!(options, InterceptionOptions::default());
        assert_eq!(options.validation, ValidationMode::Lenient);
    }

    #[test]
    fn reads_both_variables() {
        let options = InterceptionOptions::from_lookup(lookup(&[
            (VALIDATION_ENV, "Strict"),
            (LOG_PLANS_ENV, "yes"),
        ]))
        .unwrap();
        assert_eq!(options.validation, ValidationMode::Strict);
        assert!(options.log_plans);
    }

    #[test]
    fn rejects_unknown_values() {
        let err = InterceptionOptions::from_lookup(lookup(&[(VALIDATION_ENV, "paranoid")])).unwrap_err();
        assert!(matches!(err, InterceptError::Config(_)));

        let err = InterceptionOptions::from_lookup(lookup(&[(LOG_PLANS_ENV, "maybe")])).unwrap_err();
        assert!(matches!(err, InterceptError::Config(_)));
    }

    #[cfg(feature = "config")]
    #[test]
    fn parses_json() {
        let options = InterceptionOptions::from_json(r#"{ "validation": "strict" }"#).unwrap();
        assert_eq!(options.validation, ValidationMode::Strict);
        assert!(!options.log_plans);
        assert!(InterceptionOptions::from_json("{ nope").is_err());
    }
}
