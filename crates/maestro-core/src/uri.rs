//! `file://` URI conversion.

use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Errors converting between paths and `file://` URIs.
#[derive(Debug, Error)]
pub enum UriError {
    /// The path is not absolute or not representable as a URI.
    #[error("cannot convert path to file URI: {0}")]
    BadPath(PathBuf),
    /// The URI is not a valid `file://` URI.
    #[error("cannot convert URI to path: {0}")]
    BadUri(String),
}

/// Convert an absolute file path to a `file://` URI string.
///
/// # Errors
///
/// Returns an error if the path is relative or contains components that
/// cannot be represented in a URI.
pub fn path_to_uri(path: &Path) -> Result<String, UriError> {
    Url::from_file_path(path)
        .map(|u| u.to_string())
        .map_err(|()| UriError::BadPath(path.to_path_buf()))
}

/// Convert a `file://` URI string back to a local path.
///
/// # Errors
///
/// Returns an error if the string is not a parseable `file://` URI.
pub fn uri_to_path(uri: &str) -> Result<PathBuf, UriError> {
    let url = Url::parse(uri).map_err(|_| UriError::BadUri(uri.to_string()))?;
    url.to_file_path()
        .map_err(|()| UriError::BadUri(uri.to_string()))
}
