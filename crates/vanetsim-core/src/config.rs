//! In-memory scenario configuration.
//!
//! A scenario is a set of global run settings plus an ordered list of model
//! specifications (name, type, dependency expression, parameters). Scenarios
//! parse from and render to TOML text; reading and writing files is left to
//! the caller.
//!
//! ```toml
//! [run]
//! trials = 2
//! duration = 30.0
//! increment = { mode = "fixed", step = 0.5 }
//!
//! [[models]]
//! name = "map"
//! type = "RoadMap"
//!
//! [[models]]
//! name = "car1"
//! type = "FixedCar"
//! depends = "map"
//! params = { speed = "13.9", beacon = "yes" }
//! ```

use serde::{Deserialize, Serialize};

use crate::params::ParamMap;
use crate::time::{SimTime, secs};

// ===========================================================================
// Errors
// ===========================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The scenario text is not valid TOML or does not match the schema.
    #[error("scenario parse error: {0}")]
    Parse(String),
    #[error("scenario render error: {0}")]
    Render(String),
    #[error("invalid run setting '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ===========================================================================
// Run settings
// ===========================================================================

/// How simulation time advances during a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Increment {
    /// Advance in fixed steps of `step` seconds, as fast as possible.
    Fixed { step: f64 },
    /// Deliver each event no earlier than its timestamp in wall-clock time.
    RealTime,
}

impl Default for Increment {
    fn default() -> Self {
        Increment::Fixed { step: 1.0 }
    }
}

/// Global parameters for a run. Consumed by the
/// [`Runner`](crate::runner::Runner), never by models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Number of Monte Carlo trials.
    pub trials: u32,
    pub increment: Increment,
    /// Simulated seconds per trial.
    pub duration: f64,
    /// Message kinds the caller wants reported.
    pub messages: Vec<String>,
    pub profiling: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            trials: 1,
            increment: Increment::default(),
            duration: 60.0,
            messages: Vec::new(),
            profiling: false,
        }
    }
}

impl RunSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trials == 0 {
            return Err(ConfigError::Invalid {
                field: "trials",
                reason: "must be at least 1".into(),
            });
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(ConfigError::Invalid {
                field: "duration",
                reason: format!("{} is not a non-negative number of seconds", self.duration),
            });
        }
        if let Increment::Fixed { step } = self.increment
            && !(step.is_finite() && step > 0.0)
        {
            return Err(ConfigError::Invalid {
                field: "increment.step",
                reason: format!("{step} is not a positive number of seconds"),
            });
        }
        // A step below the time resolution would never advance the horizon.
        if let Increment::Fixed { step } = self.increment
            && secs(step) < SimTime::DELTA
        {
            return Err(ConfigError::Invalid {
                field: "increment.step",
                reason: format!("{step} is below the time resolution of {}", SimTime::DELTA),
            });
        }
        Ok(())
    }

    /// Trial length as simulation time.
    pub fn duration_time(&self) -> SimTime {
        secs(self.duration)
    }
}

// ===========================================================================
// Scenario
// ===========================================================================

/// One model to instantiate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    /// Names of models this one depends on, separated by whitespace or
    /// commas. Each must appear earlier in the scenario.
    #[serde(default)]
    pub depends: String,
    #[serde(default)]
    pub params: ParamMap,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            depends: String::new(),
            params: ParamMap::new(),
        }
    }

    pub fn depends_on(mut self, depends: impl Into<String>) -> Self {
        self.depends = depends.into();
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Run settings plus the models of a simulation, in load order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioSpec {
    pub run: RunSettings,
    pub models: Vec<ModelSpec>,
}

impl ScenarioSpec {
    /// Parse and validate scenario text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let scenario: ScenarioSpec =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        scenario.run.validate()?;
        Ok(scenario)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::Render(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [run]
        trials = 3
        duration = 12.5
        increment = { mode = "fixed", step = 0.25 }
        messages = ["beacon"]

        [[models]]
        name = "map"
        type = "RoadMap"

        [[models]]
        name = "car1"
        type = "FixedCar"
        depends = "map"
        params = { speed = "13.9", beacon = "yes" }
    "#;

    #[test]
    fn parses_sample() {
        let s = ScenarioSpec::from_toml_str(SAMPLE).unwrap();
        assert_eq!(s.run.trials, 3);
        assert_eq!(s.run.increment, Increment::Fixed { step: 0.25 });
        assert_eq!(s.run.messages, ["beacon"]);
        assert!(!s.run.profiling);
        assert_eq!(s.models.len(), 2);
        assert_eq!(s.models[0].depends, "");
        assert_eq!(
            s.models[1],
            ModelSpec::new("car1", "FixedCar")
                .depends_on("map")
                .param("speed", "13.9")
                .param("beacon", "yes")
        );
    }

    #[test]
    fn missing_run_table_uses_defaults() {
        let s = ScenarioSpec::from_toml_str("").unwrap();
        assert_eq!(s.run, RunSettings::default());
        assert!(s.models.is_empty());
    }

    #[test]
    fn real_time_increment() {
        let s = ScenarioSpec::from_toml_str("[run]\nincrement = { mode = \"real_time\" }\n")
            .unwrap();
        assert_eq!(s.run.increment, Increment::RealTime);
    }

    #[test]
    fn rejects_zero_trials() {
        let err = ScenarioSpec::from_toml_str("[run]\ntrials = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "trials", .. }));
    }

    #[test]
    fn rejects_non_positive_step() {
        let run = RunSettings {
            increment: Increment::Fixed { step: 0.0 },
            ..RunSettings::default()
        };
        assert!(run.validate().is_err());
    }

    #[test]
    fn rejects_step_below_time_resolution() {
        let run = RunSettings {
            duration: 1.0,
            increment: Increment::Fixed { step: 1e-12 },
            ..RunSettings::default()
        };
        assert_eq!(secs(1e-12), SimTime::ZERO);
        assert!(matches!(
            run.validate(),
            Err(ConfigError::Invalid { field: "increment.step", .. })
        ));

        let text = "[run]\nincrement = { mode = \"fixed\", step = 1e-12 }\n";
        let err = ScenarioSpec::from_toml_str(text).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "increment.step", .. }));
    }

    #[test]
    fn smallest_representable_step_is_accepted() {
        let run = RunSettings {
            increment: Increment::Fixed { step: SimTime::DELTA.to_num::<f64>() },
            ..RunSettings::default()
        };
        assert!(run.validate().is_ok());
    }

    #[test]
    fn rejects_bad_toml() {
        assert!(matches!(
            ScenarioSpec::from_toml_str("[[models]]\nname = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn renders_and_reparses() {
        let s = ScenarioSpec::from_toml_str(SAMPLE).unwrap();
        let text = s.to_toml_string().unwrap();
        assert_eq!(ScenarioSpec::from_toml_str(&text).unwrap(), s);
    }
}
