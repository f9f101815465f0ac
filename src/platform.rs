//! Interfaces to the hosting shell.
//!
//! The broker never creates windows, opens browsers, or touches cookie jars
//! itself; it drives these traits, which the embedding application
//! implements on top of its window-management and session primitives.

use snafu::Snafu;
use url::Url;

use crate::policy::SurfaceOptions;

/// Error reported by a platform collaborator. The broker treats all
/// platform failures uniformly, so a message is all that is carried.
#[derive(Debug, Snafu)]
#[snafu(display("PlatformError: {message}"))]
pub struct PlatformError {
    message: String,
}

impl PlatformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A single cookie, as exchanged with the host's cookie store.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub secure: bool,
    pub http_only: bool,
}

/// Opens URLs in the user's default external browser.
pub trait BrowserOpener {
    /// Fire-and-forget: once the browser is open, the flow continues through
    /// the OS-level callback channel.
    fn open_external(&self, url: &Url) -> Result<(), PlatformError>;
}

/// OS-level registration of a custom URL scheme.
pub trait ProtocolRegistrar {
    fn is_registered(&self, scheme: &str) -> bool;

    /// Returns whether the OS accepted the registration. A `true` return is
    /// not trusted on its own; callers verify via [`Self::is_registered`].
    fn register(&mut self, scheme: &str) -> bool;

    fn unregister(&mut self, scheme: &str) -> bool;
}

/// Handle to one browsing session's cookie jar and storage.
pub trait SessionHandle {
    /// All cookies carrying `name`, regardless of domain.
    fn cookies_named(&self, name: &str) -> Result<Vec<Cookie>, PlatformError>;

    fn set_cookie(&mut self, url: &Url, cookie: &Cookie) -> Result<(), PlatformError>;

    fn flush_cookies(&mut self) -> Result<(), PlatformError>;

    /// Wipe every kind of storage held by this session.
    fn clear_storage(&mut self) -> Result<(), PlatformError>;
}

/// Creates ephemeral sessions for embedded login attempts.
pub trait SessionFactory {
    /// A fresh, cache-disabled session sharing no storage with the main
    /// application session. Permission prompts (camera, microphone, ...)
    /// must be denied unconditionally within it.
    fn create_ephemeral(&mut self) -> Result<Box<dyn SessionHandle>, PlatformError>;
}

/// An isolated browsing surface hosting one login page.
pub trait Surface {
    fn load_url(&mut self, url: &Url) -> Result<(), PlatformError>;

    fn set_title(&mut self, title: &str);

    fn close(&mut self);
}

/// Creates isolated browsing surfaces.
pub trait SurfaceHost {
    fn create_surface(
        &mut self,
        options: &SurfaceOptions,
        title: &str,
    ) -> Result<Box<dyn Surface>, PlatformError>;
}

/// Delivers the embedded flow's result back to the original requester.
pub trait ResponseSink {
    /// Deliver `response_token` as a synthetic message declaring `origin` as
    /// its source. Receivers must independently re-validate that origin
    /// (see [`crate::validate_message_origin`]) before trusting the payload.
    fn dispatch(&mut self, origin: &str, response_token: &str) -> Result<(), PlatformError>;
}
