//! Brokers single-sign-on flows for a desktop shell that hosts a remote web
//! application inside isolated browser views.
//!
//! The crate owns the security-critical coordination work and nothing else:
//! validating candidate redirect URLs before any navigation, running one login
//! attempt inside an ephemeral isolated session with a secret-authenticated
//! callback channel, delegating a login attempt to the system browser with
//! CSRF-safe state handling, and deciding per identity provider which of the
//! two flows to use. Window creation, cookie stores, and OS protocol
//! registration stay with the hosting shell and are consumed through the
//! traits in [`platform`].
//!
//! ```
//! use sso_broker::validate_sso_redirect_url;
//!
//! let allowed_origins = vec!["https://backend.example.com".to_owned()];
//!
//! let result = validate_sso_redirect_url("https://idp.example.com/saml/login", &allowed_origins);
//! assert!(result.is_valid);
//!
//! let result = validate_sso_redirect_url("http://backend.example.com/sso/initiate", &allowed_origins);
//! assert!(!result.is_valid);
//! ```

mod callback;
mod csrf_token;
mod embedded;
mod error;
mod external_browser;
mod origin_validation;
pub mod platform;
mod policy;
mod secret_channel;

// Library exports (additional to pub modules).
pub use callback::*;
pub use csrf_token::CsrfToken;
pub use embedded::*;
pub use error::AuthError;
pub use external_browser::*;
pub use origin_validation::*;
pub use policy::*;
pub use secret_channel::{ChannelSecret, SecretChannel};

pub mod url {
    pub use url::Url;
}

type AuthorizationCode = String;
type ResponseToken = String;
