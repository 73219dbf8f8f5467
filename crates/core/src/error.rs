// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unified error codes shared across the HTTP, WebSocket/RPC, and ingest
//! surfaces.

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error kinds surfaced to callers. Every request-facing error in the crate
/// resolves to one of these; transport-specific conversions live at the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed request, bad JSON, or an argument that fails validation.
    BadRequest,
    /// The requested AppRunId or widget id does not exist.
    NotFound,
    /// An RPC command name has no entry in the method table.
    UnknownCommand,
    /// The RPC route id is not registered.
    UnknownRoute,
    /// A per-request context was cancelled before completion.
    Cancelled,
    /// Outbound message exceeded the size limit and was dropped.
    MessageTooLarge,
    /// A connection, handshake, or read/write timed out or closed.
    Transport,
    /// An unrecoverable startup condition (bind failure, lock conflict).
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::UnknownCommand => 400,
            Self::UnknownRoute => 404,
            Self::Cancelled => 499,
            Self::MessageTooLarge => 413,
            Self::Transport => 502,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::NotFound => "NOT_FOUND",
            Self::UnknownCommand => "UNKNOWN_COMMAND",
            Self::UnknownRoute => "UNKNOWN_ROUTE",
            Self::Cancelled => "CANCELLED",
            Self::MessageTooLarge => "MESSAGE_TOO_LARGE",
            Self::Transport => "TRANSPORT",
            Self::Internal => "INTERNAL",
        }
    }

    /// Convert this error code into a transport-agnostic [`ErrorBody`].
    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    /// Convert this error code into an axum JSON error response.
    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope for HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
