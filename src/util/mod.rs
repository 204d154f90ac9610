//! Utility functions shared by the pipeline stages.
//!
//! - **URL validation**: scheme gating for feed sources
//! - **Text processing**: turning untrusted feed text into safe mail headers

mod text;
mod url_validator;

pub use text::{header_line, strip_control_chars, MAX_HEADER_CHARS};
pub use url_validator::{validate_url, UrlValidationError};
