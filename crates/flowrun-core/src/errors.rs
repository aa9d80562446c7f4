//! Error types, error records, and per-component recovery protocols.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::component::ValueMap;

#[derive(Error, Debug)]
pub enum Error {
    #[error("plan validation failed: {message}")]
    Validation { message: String, errors: Vec<String> },

    #[error("execution error: {message}")]
    Execution {
        message: String,
        step: Option<String>,
        #[source]
        cause: Option<Box<Error>>,
    },

    #[error("component '{component_id}': {message}")]
    Component {
        component_id: String,
        message: String,
        inputs: Option<ValueMap>,
        #[source]
        cause: Option<Box<Error>>,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(message: impl Into<String>, errors: Vec<String>) -> Self {
        Self::Validation {
            message: message.into(),
            errors,
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            step: None,
            cause: None,
        }
    }

    pub fn execution_in_step(
        message: impl Into<String>,
        step: impl Into<String>,
        cause: Option<Error>,
    ) -> Self {
        Self::Execution {
            message: message.into(),
            step: Some(step.into()),
            cause: cause.map(Box::new),
        }
    }

    pub fn component(component_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Component {
            component_id: component_id.into(),
            message: message.into(),
            inputs: None,
            cause: None,
        }
    }

    pub fn component_with(
        component_id: impl Into<String>,
        message: impl Into<String>,
        inputs: Option<ValueMap>,
        cause: Option<Error>,
    ) -> Self {
        Self::Component {
            component_id: component_id.into(),
            message: message.into(),
            inputs,
            cause: cause.map(Box::new),
        }
    }

    /// Short taxonomy name used in error records and result reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "ValidationError",
            Self::Execution { .. } => "ExecutionError",
            Self::Component { .. } => "ComponentError",
            Self::Config(_) => "ConfigError",
            Self::Io(_) => "IoError",
            Self::Json(_) => "JsonError",
        }
    }

    pub fn component_id(&self) -> Option<&str> {
        match self {
            Self::Component { component_id, .. } => Some(component_id),
            _ => None,
        }
    }
}

/// What to do when a step fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorAction {
    #[default]
    Stop,
    Skip,
    Retry,
    Default,
}

/// Per-component (or plan-wide) error handling policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorProtocol {
    #[serde(default)]
    pub on_error: ErrorAction,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Seconds between retry attempts.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
    #[serde(default)]
    pub default_value: Option<Value>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    1.0
}

impl Default for ErrorProtocol {
    fn default() -> Self {
        Self {
            on_error: ErrorAction::Stop,
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            default_value: None,
        }
    }
}

impl ErrorProtocol {
    pub fn stop() -> Self {
        Self::default()
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        self.on_error == ErrorAction::Retry && attempt < self.max_retries
    }
}

/// How a recovered error was recovered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Skipped,
    UsedDefault,
    Retried,
}

/// Record of an error that occurred during execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    pub recovered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_action: Option<RecoveryAction>,
}

impl ErrorRecord {
    pub fn from_error(err: &Error) -> Self {
        Self {
            error_type: err.kind().to_string(),
            message: err.to_string(),
            component_id: err.component_id().map(String::from),
            step_index: None,
            recovered: false,
            recovery_action: None,
        }
    }

    pub fn at_step(mut self, index: usize) -> Self {
        self.step_index = Some(index);
        self
    }

    pub fn recovered_by(mut self, action: RecoveryAction) -> Self {
        self.recovered = true;
        self.recovery_action = Some(action);
        self
    }
}
