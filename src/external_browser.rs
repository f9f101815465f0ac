//! Login attempts delegated to the operating system's default browser.
//!
//! The user authenticates in their own browser; the result comes back
//! through an OS-level custom-scheme callback. Compared to the embedded
//! flow this removes the login page from the application process entirely,
//! which is the posture required for high-assurance providers.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use url::Url;

use crate::callback::{CallbackOutcome, CallbackParams, ExternalAuthResult};
use crate::csrf_token::CsrfToken;
use crate::error::AuthError;
use crate::origin_validation::validate_sso_redirect_url;
use crate::platform::{BrowserOpener, ProtocolRegistrar};

/// How long an attempt may wait for the browser callback before it resolves
/// as timed out.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Configuration for one external-browser authentication attempt.
#[derive(Debug, Clone)]
pub struct ExternalAuthConfig {
    /// The identity provider's authorization URL.
    pub auth_url: String,

    /// The custom-scheme URL the provider redirects back to.
    pub callback_url: String,

    /// Overrides [`DEFAULT_AUTH_TIMEOUT`] when set.
    pub timeout: Option<Duration>,

    /// Backend origins passed through to the redirect-URL validation.
    pub allowed_origins: Vec<String>,
}

struct PendingAuth {
    state: CsrfToken,
    respond_to: oneshot::Sender<ExternalAuthResult>,
}

/// Coordinates login attempts through the system browser.
///
/// At most one attempt may be in flight per coordinator, and the embedding
/// shell is expected to own exactly one coordinator, making the limit
/// process-wide. A second [`ExternalBrowserAuth::authenticate`] call fails
/// fast instead of queueing; two browser tabs racing for the same callback
/// would make it ambiguous which attempt a callback belongs to.
pub struct ExternalBrowserAuth {
    opener: Box<dyn BrowserOpener + Send + Sync>,
    pending: Mutex<Option<PendingAuth>>,
}

impl ExternalBrowserAuth {
    pub fn new(opener: Box<dyn BrowserOpener + Send + Sync>) -> Self {
        Self {
            opener,
            pending: Mutex::new(None),
        }
    }

    /// Runs one authentication attempt end to end: validates the auth URL,
    /// generates the CSRF state, opens the system browser, and suspends
    /// until the callback arrives, [`Self::cancel`] is called, or the
    /// timeout fires — whichever happens first.
    ///
    /// Flow-terminal outcomes (timeout, cancellation, rejected callbacks)
    /// come back as an [`ExternalAuthResult`]; `Err` is reserved for
    /// attempts that never started.
    pub async fn authenticate(
        &self,
        config: ExternalAuthConfig,
    ) -> Result<ExternalAuthResult, AuthError> {
        let (auth_url, state, receiver) = {
            let mut slot = self.lock_pending();
            if slot.is_some() {
                return Err(AuthError::AlreadyInProgress);
            }

            let validation = validate_sso_redirect_url(&config.auth_url, &config.allowed_origins);
            if !validation.is_valid {
                return Err(AuthError::InvalidAuthUrl {
                    reason: validation.reason.unwrap_or_default(),
                });
            }

            let state = CsrfToken::new();
            let auth_url = build_auth_url(&config.auth_url, &config.callback_url, &state)?;
            let (respond_to, receiver) = oneshot::channel();
            *slot = Some(PendingAuth {
                state: state.clone(),
                respond_to,
            });
            (auth_url, state, receiver)
        };

        tracing::debug!(%auth_url, "Starting external browser authentication");

        if let Err(source) = self.opener.open_external(&auth_url) {
            self.clear_pending_matching(&state);
            return Err(AuthError::OpenBrowser { source });
        }

        let timeout = config.timeout.unwrap_or(DEFAULT_AUTH_TIMEOUT);
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => Ok(result),
            // The sender half only disappears together with the pending
            // slot, which means someone cleaned up around us.
            Ok(Err(_)) => Ok(ExternalAuthResult::user_cancelled()),
            Err(_elapsed) => {
                tracing::warn!("Authentication timeout");
                self.clear_pending_matching(&state);
                Ok(ExternalAuthResult::timeout())
            }
        }
    }

    /// Feeds a callback URL received from the OS into the pending attempt.
    ///
    /// Returns `false`, with no state change, when no attempt is in flight;
    /// spurious or replayed callbacks must not do anything. Returns `true`
    /// whenever an attempt was pending — the callback is consumed even when
    /// its validation fails, and callers must not reprocess it.
    pub fn handle_callback(&self, callback_url: &str) -> bool {
        let Some(pending) = self.take_pending() else {
            tracing::warn!("Received callback but no authentication in progress");
            return false;
        };

        let result = match Url::parse(callback_url) {
            Err(err) => {
                tracing::warn!(%err, "Error parsing callback URL");
                ExternalAuthResult::callback_parse_error()
            }
            Ok(url) => {
                let params = CallbackParams::parse(&url);
                // The CSRF comparison comes first; a provider "error" with a
                // forged state is still a forgery.
                if params.state.as_deref() != Some(pending.state.as_str()) {
                    ExternalAuthResult::invalid_state()
                } else {
                    match params.outcome {
                        CallbackOutcome::Success { code } => {
                            ExternalAuthResult::success(code, pending.state.as_str())
                        }
                        CallbackOutcome::ProviderError { error, description } => {
                            ExternalAuthResult::failure(error, description)
                        }
                        CallbackOutcome::Malformed => ExternalAuthResult::invalid_callback(),
                    }
                }
            }
        };

        // Losing the receiver just means the caller already gave up.
        let _ = pending.respond_to.send(result);
        true
    }

    /// Resolves any in-flight attempt as cancelled by the user. Safe and
    /// idempotent when nothing is pending.
    pub fn cancel(&self) {
        if let Some(pending) = self.take_pending() {
            let _ = pending.respond_to.send(ExternalAuthResult::user_cancelled());
        }
    }

    pub fn is_auth_in_progress(&self) -> bool {
        self.lock_pending().is_some()
    }

    fn take_pending(&self) -> Option<PendingAuth> {
        self.lock_pending().take()
    }

    // A callback plus a fresh attempt may race an elapsed timer; only the
    // attempt that owns the slot may clear it.
    fn clear_pending_matching(&self, state: &CsrfToken) {
        let mut slot = self.lock_pending();
        if slot.as_ref().is_some_and(|pending| pending.state == *state) {
            *slot = None;
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<PendingAuth>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn build_auth_url(
    base_url: &str,
    callback_url: &str,
    state: &CsrfToken,
) -> Result<Url, AuthError> {
    let mut url = Url::parse(base_url).map_err(|_| AuthError::InvalidAuthUrl {
        reason: "Invalid URL format".to_owned(),
    })?;
    url.query_pairs_mut()
        .append_pair("redirect_uri", callback_url)
        .append_pair("state", state.as_str())
        .append_pair("response_type", "code");
    Ok(url)
}

/// Registers the custom callback scheme with the OS. Idempotent, verified
/// after the fact, and reported as a boolean: the application must keep
/// working (falling back to the embedded flow) when registration is
/// unavailable on a platform.
pub fn register_protocol_handler(registrar: &mut dyn ProtocolRegistrar, scheme: &str) -> bool {
    if scheme.is_empty() {
        tracing::error!("Invalid protocol name for registration");
        return false;
    }
    if registrar.is_registered(scheme) {
        tracing::debug!(scheme, "Protocol is already registered");
        return true;
    }
    if !registrar.register(scheme) {
        tracing::error!(scheme, "Failed to register protocol handler");
        return false;
    }
    if !registrar.is_registered(scheme) {
        tracing::warn!(
            scheme,
            "Protocol registration reported success but verification failed"
        );
        return false;
    }
    tracing::debug!(scheme, "Registered protocol handler");
    true
}

/// Counterpart of [`register_protocol_handler`], with the same contract.
pub fn unregister_protocol_handler(registrar: &mut dyn ProtocolRegistrar, scheme: &str) -> bool {
    if scheme.is_empty() {
        tracing::error!("Invalid protocol name for unregistration");
        return false;
    }
    if !registrar.is_registered(scheme) {
        tracing::debug!(scheme, "Protocol is not registered");
        return true;
    }
    if !registrar.unregister(scheme) {
        tracing::error!(scheme, "Failed to unregister protocol handler");
        return false;
    }
    if registrar.is_registered(scheme) {
        tracing::warn!(
            scheme,
            "Protocol unregistration reported success but verification failed"
        );
        return false;
    }
    tracing::debug!(scheme, "Unregistered protocol handler");
    true
}
