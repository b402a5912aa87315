//! Decoder for the mapping service's positional nested-array payloads.

pub mod hours;
pub mod listing;
pub mod node;
pub mod reviews;
pub mod text;

pub use listing::{parse_listing, parse_review_count};
pub use reviews::parse_extra_reviews;

use crate::error::ParseError;
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};

/// Anti-hijacking marker some payloads start with
pub const SECURITY_PREFIX: &[u8] = b")]}'";

/// Drop the security marker if present
pub fn strip_security_prefix(data: &[u8]) -> &[u8] {
    data.strip_prefix(SECURITY_PREFIX).unwrap_or(data)
}

/// Single fault boundary per parse call: a panic while decoding one record
/// becomes a `ParseError` instead of unwinding through the caller's batch.
pub(crate) fn guarded<T>(decode: impl FnOnce() -> Result<T, ParseError>) -> Result<T, ParseError> {
    match panic::catch_unwind(AssertUnwindSafe(decode)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());

            Err(ParseError::Panicked {
                message,
                backtrace: Backtrace::force_capture().to_string(),
            })
        }
    }
}
