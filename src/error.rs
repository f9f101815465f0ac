use crate::platform::PlatformError;
use snafu::Snafu;

/// An enumeration representing the authentication broker's errors.
///
/// Flow-terminal outcomes (timeout, cancellation, a rejected callback) are
/// not errors; they are delivered as results to the original requester.
/// Everything here either stops an attempt before it starts or indicates a
/// programming defect.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AuthError {
    /// Another attempt already holds the single external-auth slot. The
    /// caller must wait for it to resolve instead of queueing behind it.
    #[snafu(display("AuthError: Authentication already in progress"))]
    AlreadyInProgress,

    #[snafu(display("AuthError: Invalid auth URL: {reason}"))]
    InvalidAuthUrl { reason: String },

    #[snafu(display("AuthError: Could not open external browser"))]
    OpenBrowser { source: PlatformError },

    #[snafu(display("AuthError: Platform collaborator failed"))]
    Platform { source: PlatformError },

    /// A response token outside the allowed shape reached dispatch. The
    /// token originates from the login page, so this means the page is
    /// compromised or misbehaving and the response must not be delivered.
    #[snafu(display("AuthError: Invalid response token detected, aborting"))]
    InvalidResponseToken,

    /// The callback channel was gone when teardown went to unregister it.
    /// This is a defect in the session lifecycle, not an adversarial input.
    #[snafu(display("AuthError: Callback channel is not registered"))]
    ChannelNotRegistered,
}
