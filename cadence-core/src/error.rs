//! Error types for cadence.

use thiserror::Error;

use crate::request::RequestId;

/// Errors raised by an [`Engine`](crate::Engine) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Sampling parameters are out of range or mutually inconsistent,
    /// or the request can never be scheduled.
    #[error("invalid sampling configuration: {0}")]
    InvalidConfiguration(String),

    /// The identifier belongs to a request that has not finished yet.
    #[error("request {0:?} is already in flight")]
    DuplicateIdentifier(RequestId),

    /// Anything that went wrong while advancing in-flight work. Carries the
    /// request being advanced when the failure is tied to one.
    #[error("engine fault{}: {message}", fault_scope(.request_id))]
    Fault {
        request_id: Option<RequestId>,
        message: String,
    },
}

fn fault_scope(request_id: &Option<RequestId>) -> String {
    match request_id {
        Some(id) => format!(" in request {}", id),
        None => String::new(),
    }
}

impl EngineError {
    /// A fault not tied to any single request
    pub fn fault(message: impl Into<String>) -> Self {
        EngineError::Fault {
            request_id: None,
            message: message.into(),
        }
    }

    pub fn request_fault(request_id: impl Into<RequestId>, message: impl Into<String>) -> Self {
        EngineError::Fault {
            request_id: Some(request_id.into()),
            message: message.into(),
        }
    }

    /// Request the error is about, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            EngineError::DuplicateIdentifier(id) => Some(id.as_str()),
            EngineError::Fault { request_id, .. } => request_id.as_deref(),
            EngineError::InvalidConfiguration(_) => None,
        }
    }
}

/// Errors that abort an admission-drain run.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The workload catalog is empty or holds a malformed entry.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("tick {tick}: submitting request {request_id} failed")]
    Submit {
        tick: u64,
        request_id: RequestId,
        #[source]
        source: EngineError,
    },

    #[error("tick {tick}: engine step failed")]
    Step {
        tick: u64,
        #[source]
        source: EngineError,
    },
}

impl DriverError {
    /// The engine error underneath a submit or step failure.
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            DriverError::Submit { source, .. } | DriverError::Step { source, .. } => Some(source),
            DriverError::Configuration(_) => None,
        }
    }

    /// Identifier that triggered the failure. A step fault names one only when
    /// the engine tied it to a request.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            DriverError::Submit { request_id, .. } => Some(request_id.as_str()),
            DriverError::Step { source, .. } => source.request_id(),
            DriverError::Configuration(_) => None,
        }
    }

    /// Tick on which the run aborted, if the failure happened inside the loop.
    pub fn tick(&self) -> Option<u64> {
        match self {
            DriverError::Submit { tick, .. } | DriverError::Step { tick, .. } => Some(*tick),
            DriverError::Configuration(_) => None,
        }
    }
}
