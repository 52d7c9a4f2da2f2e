//! Mapping from a stabilized decision to a bounded actuator command.

use crate::config::ActuatorConfig;
use crate::core::stabilizer::StabilizedDecision;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActuatorMapError {
    #[error("command {value} for {entry} exceeds maximum {max}")]
    OutOfRange {
        entry: String,
        value: u16,
        max: u16,
    },
}

/// A command in `[0, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorCommand {
    value: u16,
    max: u16,
}

impl ActuatorCommand {
    pub fn value(&self) -> u16 {
        self.value
    }

    pub fn max(&self) -> u16 {
        self.max
    }

    /// Share of the full range, 0-100.
    pub fn percent(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        100.0 * self.value as f64 / self.max as f64
    }
}

/// Static decision → command table.
#[derive(Debug, Clone)]
pub struct ActuatorMap {
    max: u16,
    class_commands: Vec<u16>,
    target_command: u16,
    non_target_command: u16,
}

impl ActuatorMap {
    /// Build the table, rejecting any entry above `max_command`.
    pub fn new(config: &ActuatorConfig) -> Result<Self, ActuatorMapError> {
        let max = config.max_command;
        let check = |entry: String, value: u16| {
            if value > max {
                Err(ActuatorMapError::OutOfRange { entry, value, max })
            } else {
                Ok(())
            }
        };

        for (idx, &value) in config.class_commands.iter().enumerate() {
            check(format!("class {idx}"), value)?;
        }
        check("target".to_string(), config.target_command)?;
        check("non-target".to_string(), config.non_target_command)?;

        Ok(Self {
            max,
            class_commands: config.class_commands.clone(),
            target_command: config.target_command,
            non_target_command: config.non_target_command,
        })
    }

    /// Command for a decision. Unknown classes and the idle state map to 0.
    pub fn map(&self, decision: StabilizedDecision) -> ActuatorCommand {
        let value = match decision {
            StabilizedDecision::Idle => 0,
            StabilizedDecision::Binary(true) => self.target_command,
            StabilizedDecision::Binary(false) => self.non_target_command,
            StabilizedDecision::Class(c) => self.class_commands.get(c).copied().unwrap_or(0),
        };
        ActuatorCommand {
            value: value.min(self.max),
            max: self.max,
        }
    }

    pub fn max(&self) -> u16 {
        self.max
    }
}
