// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Comprehensive error catalog for marketsync.
//!
//! Mirrors the shape of the ancestor workspace's contract-error catalog: a flat
//! enum with a machine-readable `code()`, a `category()`, and a `description()`.

use std::fmt;

/// A single machine-readable error code, grouped into one of six categories
/// matching the error handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// A malformed request shape.
    BadRequest,
    /// A field/cross-field validation rule was violated.
    ValidationError,

    /// A network operation timed out.
    Timeout,
    /// The connection could not be established.
    ConnectionError,
    /// The origin returned a 5xx.
    ServerError,
    /// The origin rate-limited the request.
    TooManyRequests,
    /// The origin served a captcha/anti-bot challenge.
    Captcha,

    /// The origin denied the request (non-retryable).
    Forbidden,
    /// The requested resource does not exist.
    NotFound,

    /// The response layout did not match any tagged rule-set.
    Malformed,
    /// The response matched a rule-set but violated its schema.
    SchemaMismatch,

    /// A unique-key conflict that can be resolved by merge-and-retry.
    UniqueViolation,
    /// A queue operation used an expired or superseded lease token.
    StaleLease,
    /// A checkpoint's checksum did not match its stored bytes.
    CheckpointCorrupt,

    /// The durable queue backend is unreachable.
    QueueUnavailable,
    /// The persistence port backend is unreachable.
    StoreUnavailable,
}

/// High-level grouping of [`ErrorCode`]s, matching the error handling design's taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// User-facing, 4xx-shaped input errors.
    Input,
    /// Transient I/O errors, retried with backoff.
    TransientIo,
    /// Permanent fetch errors, never retried.
    PermanentFetch,
    /// Data/schema errors, never retried.
    Data,
    /// Consistency errors, recovered automatically.
    Consistency,
    /// Systemic/backend-unavailable errors.
    Systemic,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Input => "input",
            Self::TransientIo => "transient_io",
            Self::PermanentFetch => "permanent_fetch",
            Self::Data => "data",
            Self::Consistency => "consistency",
            Self::Systemic => "systemic",
        };
        f.write_str(s)
    }
}

impl ErrorCode {
    /// Machine-readable code string, e.g. `"MKS-T001"`.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest => "MKS-I001",
            Self::ValidationError => "MKS-I002",

            Self::Timeout => "MKS-T001",
            Self::ConnectionError => "MKS-T002",
            Self::ServerError => "MKS-T003",
            Self::TooManyRequests => "MKS-T004",
            Self::Captcha => "MKS-T005",

            Self::Forbidden => "MKS-F001",
            Self::NotFound => "MKS-F002",

            Self::Malformed => "MKS-D001",
            Self::SchemaMismatch => "MKS-D002",

            Self::UniqueViolation => "MKS-C001",
            Self::StaleLease => "MKS-C002",
            Self::CheckpointCorrupt => "MKS-C003",

            Self::QueueUnavailable => "MKS-S001",
            Self::StoreUnavailable => "MKS-S002",
        }
    }

    /// The category this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::BadRequest | Self::ValidationError => ErrorCategory::Input,
            Self::Timeout
            | Self::ConnectionError
            | Self::ServerError
            | Self::TooManyRequests
            | Self::Captcha => ErrorCategory::TransientIo,
            Self::Forbidden | Self::NotFound => ErrorCategory::PermanentFetch,
            Self::Malformed | Self::SchemaMismatch => ErrorCategory::Data,
            Self::UniqueViolation | Self::StaleLease | Self::CheckpointCorrupt => {
                ErrorCategory::Consistency
            }
            Self::QueueUnavailable | Self::StoreUnavailable => ErrorCategory::Systemic,
        }
    }

    /// Short human-readable description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::BadRequest => "the request could not be parsed or is structurally invalid",
            Self::ValidationError => "a field or cross-field validation rule was violated",
            Self::Timeout => "the operation did not complete within its timeout",
            Self::ConnectionError => "a connection to the origin could not be established",
            Self::ServerError => "the origin returned a server error",
            Self::TooManyRequests => "the origin rate-limited the request",
            Self::Captcha => "the origin served an anti-bot challenge",
            Self::Forbidden => "the origin denied the request",
            Self::NotFound => "the requested resource does not exist",
            Self::Malformed => "the response layout did not match any tagged rule-set",
            Self::SchemaMismatch => "the response matched a rule-set but violated its schema",
            Self::UniqueViolation => "a unique-key conflict occurred",
            Self::StaleLease => "the lease token is expired or superseded",
            Self::CheckpointCorrupt => "the checkpoint checksum did not match its stored bytes",
            Self::QueueUnavailable => "the durable queue backend is unreachable",
            Self::StoreUnavailable => "the persistence port backend is unreachable",
        }
    }

    /// Whether a fresh attempt at the same operation is worth making.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::TransientIo | ErrorCategory::Consistency | ErrorCategory::Systemic
        )
    }

    /// Conventional HTTP status this code maps to on the admin surface.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest | Self::ValidationError => 400,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::TooManyRequests => 429,
            Self::Timeout | Self::ConnectionError => 504,
            Self::ServerError
            | Self::Captcha
            | Self::Malformed
            | Self::SchemaMismatch
            | Self::UniqueViolation
            | Self::StaleLease
            | Self::CheckpointCorrupt
            | Self::QueueUnavailable
            | Self::StoreUnavailable => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::error::Error for ErrorCode {}

/// A structured error surfaced at the HTTP boundary: `{code, message, details}`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ApiError {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Build an [`ApiError`] from an [`ErrorCode`] and a human-readable message.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code().to_string(),
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_codes_are_retryable() {
        assert!(ErrorCode::Timeout.is_retryable());
        assert!(ErrorCode::TooManyRequests.is_retryable());
        assert!(!ErrorCode::Malformed.is_retryable());
        assert!(!ErrorCode::Forbidden.is_retryable());
    }

    #[test]
    fn codes_are_unique() {
        let all = [
            ErrorCode::BadRequest,
            ErrorCode::ValidationError,
            ErrorCode::Timeout,
            ErrorCode::ConnectionError,
            ErrorCode::ServerError,
            ErrorCode::TooManyRequests,
            ErrorCode::Captcha,
            ErrorCode::Forbidden,
            ErrorCode::NotFound,
            ErrorCode::Malformed,
            ErrorCode::SchemaMismatch,
            ErrorCode::UniqueViolation,
            ErrorCode::StaleLease,
            ErrorCode::CheckpointCorrupt,
            ErrorCode::QueueUnavailable,
            ErrorCode::StoreUnavailable,
        ];
        let mut codes: Vec<&str> = all.iter().map(ErrorCode::code).collect();
        let before = codes.len();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), before);
    }

    #[test]
    fn category_display() {
        assert_eq!(ErrorCode::Timeout.category().to_string(), "transient_io");
    }
}
