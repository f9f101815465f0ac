//! Typed views of auth callback data.
//!
//! Callback URLs arrive from outside the trust boundary, so their query
//! parameters are parsed into a tagged value once, up front; no business
//! logic inspects raw query strings.

use url::Url;

use crate::AuthorizationCode;

/// Query parameters of an OAuth-style callback URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    /// The `state` parameter, needed for the CSRF comparison in every case,
    /// including provider errors.
    pub state: Option<String>,
    pub outcome: CallbackOutcome,
}

/// What the callback actually carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The provider returned an authorization code.
    Success { code: AuthorizationCode },

    /// The provider reported an error.
    ProviderError {
        error: String,
        description: Option<String>,
    },

    /// Neither a code nor an error was present.
    Malformed,
}

impl CallbackParams {
    pub fn parse(url: &Url) -> Self {
        let mut code = None;
        let mut state = None;
        let mut error = None;
        let mut description = None;

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                "error_description" => description = Some(value.into_owned()),
                _ => {}
            }
        }

        let outcome = if let Some(error) = error {
            CallbackOutcome::ProviderError { error, description }
        } else if let Some(code) = code {
            CallbackOutcome::Success { code }
        } else {
            CallbackOutcome::Malformed
        };

        Self { state, outcome }
    }
}

/// Terminal result of one external-browser authentication attempt,
/// delivered exactly once.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExternalAuthResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl ExternalAuthResult {
    pub fn success(code: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(code.into()),
            state: Some(state.into()),
            error: None,
            error_description: None,
        }
    }

    pub fn failure(error: impl Into<String>, description: Option<String>) -> Self {
        Self {
            success: false,
            code: None,
            state: None,
            error: Some(error.into()),
            error_description: description,
        }
    }

    pub(crate) fn timeout() -> Self {
        Self::failure("timeout", Some("Authentication timed out".to_owned()))
    }

    pub(crate) fn user_cancelled() -> Self {
        Self::failure(
            "user_cancelled",
            Some("Authentication cancelled by user".to_owned()),
        )
    }

    pub(crate) fn invalid_state() -> Self {
        Self::failure("invalid_state", Some("State parameter mismatch".to_owned()))
    }

    pub(crate) fn invalid_callback() -> Self {
        Self::failure(
            "invalid_callback",
            Some("No authorization code or error in callback".to_owned()),
        )
    }

    pub(crate) fn callback_parse_error() -> Self {
        Self::failure(
            "callback_parse_error",
            Some("Failed to parse callback URL".to_owned()),
        )
    }
}
