//! Parse error types

use thiserror::Error;

/// Errors that can occur while parsing Kerberos files
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KrbError {
    /// Input is shorter than the smallest valid credential cache
    #[error("Credential cache too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },

    /// Unknown or unsupported credential cache version
    #[error("Unsupported credential cache version: {0:#06x}")]
    UnsupportedVersion(u16),

    /// Input ended in the middle of a field
    #[error("Truncated credential cache: needed {needed} bytes for {field}, {remaining} left")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    /// A field held a value that cannot be valid
    #[error("Invalid credential cache field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Malformed krb5.conf line
    #[error("krb5.conf line {line}: {reason}")]
    Syntax { line: usize, reason: String },
}
