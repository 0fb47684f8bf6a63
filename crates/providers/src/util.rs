//! Shared utility functions for provider adapters.

use vg_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Read the API key named by `api_key_env`, when configured.
///
/// A configured-but-missing variable is an error; no configuration at all
/// means the backend runs unauthenticated (the local Ollama case).
pub(crate) fn resolve_api_key(api_key_env: Option<&str>) -> Result<Option<String>> {
    match api_key_env {
        None => Ok(None),
        Some(var) => match std::env::var(var) {
            Ok(key) if !key.is_empty() => Ok(Some(key)),
            _ => Err(Error::Config(format!(
                "llm.api_key_env points at '{var}' but the variable is not set"
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_env_configured_means_no_key() {
        assert!(resolve_api_key(None).unwrap().is_none());
    }

    #[test]
    fn configured_env_is_read() {
        std::env::set_var("VG_TEST_API_KEY_READ", "k-123");
        let key = resolve_api_key(Some("VG_TEST_API_KEY_READ")).unwrap();
        assert_eq!(key.as_deref(), Some("k-123"));
        std::env::remove_var("VG_TEST_API_KEY_READ");
    }

    #[test]
    fn configured_but_missing_env_is_an_error() {
        let err = resolve_api_key(Some("VG_TEST_API_KEY_MISSING_99")).unwrap_err();
        assert!(err.to_string().contains("VG_TEST_API_KEY_MISSING_99"));
    }
}
