// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for the federation engine
//!
//! All backend-specific errors are mapped to these unified error types
//! so callers see consistent failures regardless of which store a schema
//! lives in.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all query engine operations
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum QueryError {
    #[error("Failed to load schema '{schema}': {message}")]
    LoadFailed { schema: String, message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Operation not supported: {message}")]
    Unsupported { message: String },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl QueryError {
    pub fn load_failed(schema: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::LoadFailed {
            schema: schema.into(),
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation { message: msg.into() }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported { message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { message: msg.into() }
    }
}

/// Result type alias for engine operations
pub type QueryEngineResult<T> = Result<T, QueryError>;
