//! The private callback channel used by the embedded SSO flow.
//!
//! The login page cannot talk back to the shell directly (the isolated
//! surface is sandboxed, with no native integration), so it reports its
//! result by navigating to a custom-scheme URL. That URL must carry the
//! session's one-time secret; everything else is noise and is dropped
//! without affecting the attempt.

use rand::Rng;
use snafu::{OptionExt, Snafu, ensure};
use url::Url;

use crate::ResponseToken;

/// Host component every channel request must use.
pub(crate) const CHANNEL_HOST: &str = "response";

/// Upper bound on the length of a response token delivered over the channel.
pub(crate) const RESPONSE_TOKEN_SIZE_LIMIT: usize = 255;

/// Single-use secret authenticating the callback channel of one embedded
/// login attempt. 24 bytes of cryptographically secure random data,
/// base64-url encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSecret {
    secret: String,
}

impl ChannelSecret {
    pub(crate) fn new() -> Self {
        use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

        let mut rng = rand::rng();
        let bytes: [u8; 24] = rng.random();
        let secret = URL_SAFE_NO_PAD.encode(bytes);

        Self { secret }
    }

    pub fn as_str(&self) -> &str {
        &self.secret
    }
}

/// Why a channel request was rejected. Logged, never surfaced; surfacing
/// these would hand an attacker an oracle for probing the channel.
#[derive(Debug, Snafu)]
enum ChannelViolation {
    #[snafu(display("Request URL is malformed"))]
    MalformedUrl,

    #[snafu(display("Protocol is invalid"))]
    InvalidProtocol,

    #[snafu(display("Host is invalid"))]
    InvalidHost,

    #[snafu(display("Secret has not been set or has been consumed"))]
    SecretConsumed,

    #[snafu(display("Secret is invalid"))]
    InvalidSecret,

    #[snafu(display("Response is empty"))]
    EmptyResponse,

    #[snafu(display("Response type is too long"))]
    OversizedResponse,
}

/// A registered, per-session callback channel. Accepts exactly one
/// authenticated request over its lifetime.
#[derive(Debug)]
pub struct SecretChannel {
    scheme: String,
    secret: Option<ChannelSecret>,
}

impl SecretChannel {
    /// Create a channel for `scheme` with a fresh one-time secret.
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            secret: Some(ChannelSecret::new()),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The secret, as long as it has not been consumed. Exposed so the
    /// page-side bridge can embed it into the callback URL it assembles.
    pub fn secret(&self) -> Option<&ChannelSecret> {
        self.secret.as_ref()
    }

    /// Validates a request against the channel contract and hands back the
    /// response token when every check passes. The secret is consumed on
    /// first success, so a replayed request can never finalize a second
    /// time. Violations are logged and swallowed.
    pub fn handle_request(&mut self, request_url: &str) -> Option<ResponseToken> {
        match self.validate_request(request_url) {
            Ok(token) => {
                self.secret = None;
                Some(token)
            }
            Err(violation) => {
                tracing::warn!(%violation, "Rejected callback channel request");
                None
            }
        }
    }

    fn validate_request(&self, request_url: &str) -> Result<ResponseToken, ChannelViolation> {
        let url = Url::parse(request_url).ok().context(MalformedUrlSnafu)?;

        ensure!(url.scheme() == self.scheme, InvalidProtocolSnafu);
        ensure!(url.host_str() == Some(CHANNEL_HOST), InvalidHostSnafu);

        let secret = self.secret.as_ref().context(SecretConsumedSnafu)?;
        let presented = query_param(&url, "secret");
        ensure!(
            presented.as_deref() == Some(secret.as_str()),
            InvalidSecretSnafu
        );

        let token = query_param(&url, "type").context(EmptyResponseSnafu)?;
        ensure!(
            token.len() <= RESPONSE_TOKEN_SIZE_LIMIT,
            OversizedResponseSnafu
        );

        Ok(token)
    }
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Response tokens are upper-case words: `[A-Z_]{1,255}`. Checked once more
/// right before dispatch, since the token text originates from the guest
/// page.
pub fn is_valid_response_token(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= RESPONSE_TOKEN_SIZE_LIMIT
        && token
            .bytes()
            .all(|byte| byte == b'_' || byte.is_ascii_uppercase())
}
