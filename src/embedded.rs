//! The embedded SSO flow: one login attempt inside an ephemeral, isolated
//! browsing session.
//!
//! The identity provider's page runs in a sandboxed surface with its own
//! throwaway session. The page reports its result over the secret channel;
//! on success, exactly one cookie — the application's authentication cookie
//! — is copied into the main session, and everything else is destroyed with
//! the surface. Nothing outside this module can reach the ephemeral
//! session's storage.

use snafu::{ResultExt, ensure};
use url::Url;

use crate::error::{
    AlreadyInProgressSnafu, AuthError, ChannelNotRegisteredSnafu, InvalidResponseTokenSnafu,
    PlatformSnafu,
};
use crate::platform::{
    PlatformError, ResponseSink, SessionFactory, SessionHandle, Surface, SurfaceHost,
};
use crate::policy::SurfaceOptions;
use crate::secret_channel::{ChannelSecret, SecretChannel, is_valid_response_token};

/// The login page completed authentication and set the auth cookie.
pub const AUTH_SUCCESS: &str = "AUTH_SUCCESS";
/// Transferring the auth cookie into the main session failed.
pub const AUTH_ERROR_COOKIE: &str = "AUTH_ERROR_COOKIE";
/// No ephemeral session existed when the success callback arrived.
pub const AUTH_ERROR_SESSION_NOT_AVAILABLE: &str = "AUTH_ERROR_SESS_NOT_AVAILABLE";

const MAX_ORIGIN_DOMAIN_LENGTH: usize = 255;
const MAX_ORIGIN_LENGTH: usize = "https://".len() + MAX_ORIGIN_DOMAIN_LENGTH;

/// Options for one embedded SSO attempt.
#[derive(Debug, Clone)]
pub struct EmbeddedSsoOptions {
    /// Scheme of the private callback channel.
    pub channel_scheme: String,

    /// Name of the authentication cookie transferred on success.
    pub auth_cookie_name: String,

    /// Backend origins the user already trusts. The surface title stays
    /// blank for them; any other origin is shown verbatim so the user can
    /// see they are not on the application's domain.
    pub allowed_backend_origins: Vec<String>,

    /// Surface parameters, normally taken from
    /// [`crate::AuthFlowPolicy::secure_surface_options`].
    pub surface: SurfaceOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Loading,
    Finalizing,
    Closed,
}

/// Orchestrates one embedded login attempt.
///
/// Lifecycle: `Created → Loading → (Finalizing) → Closed`. Finalization is
/// first-call-wins, and teardown runs exactly once no matter how the
/// surface goes away — success, user cancellation, or navigation.
pub struct EmbeddedSsoSession {
    options: EmbeddedSsoOptions,
    provider_url: Url,
    phase: Phase,
    channel: Option<SecretChannel>,
    ephemeral: Option<Box<dyn SessionHandle>>,
    main_session: Box<dyn SessionHandle>,
    surface: Option<Box<dyn Surface>>,
    sink: Box<dyn ResponseSink>,
}

impl EmbeddedSsoSession {
    /// `provider_url` must already have passed
    /// [`crate::validate_sso_redirect_url`]; this type never navigates to
    /// anything it was not handed.
    pub fn new(
        provider_url: Url,
        options: EmbeddedSsoOptions,
        main_session: Box<dyn SessionHandle>,
        sink: Box<dyn ResponseSink>,
    ) -> Self {
        Self {
            options,
            provider_url,
            phase: Phase::Created,
            channel: None,
            ephemeral: None,
            main_session,
            surface: None,
            sink,
        }
    }

    /// Sets up the ephemeral session, the callback channel, and the
    /// isolated surface, then loads the identity provider page into it.
    pub fn init(
        &mut self,
        sessions: &mut dyn SessionFactory,
        host: &mut dyn SurfaceHost,
    ) -> Result<(), AuthError> {
        ensure!(self.phase == Phase::Created, AlreadyInProgressSnafu);

        let ephemeral = sessions.create_ephemeral().context(PlatformSnafu)?;

        let origin = self.provider_url.origin().ascii_serialization();
        let title = window_title(&origin, &self.options.allowed_backend_origins);
        let mut surface = host
            .create_surface(&self.options.surface, &title)
            .context(PlatformSnafu)?;

        // The channel must exist before the page loads; the page's first
        // action may already be the callback navigation.
        self.channel = Some(SecretChannel::new(&self.options.channel_scheme));

        surface.load_url(&self.provider_url).context(PlatformSnafu)?;

        self.ephemeral = Some(ephemeral);
        self.surface = Some(surface);
        self.phase = Phase::Loading;

        tracing::debug!(%origin, "Embedded SSO session initialized");
        Ok(())
    }

    /// The channel secret, for the page-side bridge that assembles the
    /// callback URL. Gone once consumed or torn down.
    pub fn channel_secret(&self) -> Option<&ChannelSecret> {
        self.channel.as_ref().and_then(SecretChannel::secret)
    }

    /// Called when the surface is about to navigate. Refuses oversized
    /// origins; the window title keeps tracking the attempted origin either
    /// way, so the user sees where the page tried to go.
    pub fn handle_will_navigate(&mut self, target: &Url) -> bool {
        let origin = target.origin().ascii_serialization();
        let allowed = origin.len() <= MAX_ORIGIN_LENGTH;
        if !allowed {
            tracing::warn!("Refusing navigation to oversized origin");
        }
        let title = window_title(&origin, &self.options.allowed_backend_origins);
        if let Some(surface) = self.surface.as_mut() {
            surface.set_title(&title);
        }
        allowed
    }

    /// Entry point for the private callback channel. Unauthenticated or
    /// malformed requests are logged by the channel and change nothing.
    pub fn handle_channel_request(&mut self, request_url: &str) -> Result<(), AuthError> {
        if self.phase == Phase::Closed {
            tracing::warn!("Ignoring channel request after session close");
            return Ok(());
        }
        let Some(channel) = self.channel.as_mut() else {
            tracing::warn!("Ignoring channel request without a registered channel");
            return Ok(());
        };
        let Some(token) = channel.handle_request(request_url) else {
            return Ok(());
        };
        self.finalize_login(&token)
    }

    /// Completes the attempt with the page-reported result. First call
    /// wins; later calls are ignored.
    ///
    /// On [`AUTH_SUCCESS`], the authentication cookie is copied from the
    /// ephemeral into the main session before the result is reported; a
    /// failed copy reports [`AUTH_ERROR_COOKIE`] instead of success. Any
    /// other token passes through to the requester unchanged.
    pub fn finalize_login(&mut self, response_token: &str) -> Result<(), AuthError> {
        match self.phase {
            Phase::Finalizing | Phase::Closed => {
                tracing::warn!(token = response_token, "Ignoring repeated login finalization");
                return Ok(());
            }
            Phase::Created | Phase::Loading => {}
        }
        self.phase = Phase::Finalizing;

        if response_token == AUTH_SUCCESS {
            let Some(ephemeral) = self.ephemeral.as_ref() else {
                return self.dispatch_response(AUTH_ERROR_SESSION_NOT_AVAILABLE);
            };
            if let Err(err) = copy_auth_cookie(
                ephemeral.as_ref(),
                self.main_session.as_mut(),
                &self.options.auth_cookie_name,
                &self.provider_url,
            ) {
                tracing::warn!(%err, "Could not transfer authentication cookie");
                return self.dispatch_response(AUTH_ERROR_COOKIE);
            }
        }

        self.dispatch_response(response_token)
    }

    /// Teardown on surface close, by any means. Wipes the ephemeral
    /// session's storage and unregisters the channel. Runs exactly once and
    /// is safe to call even if [`Self::init`] never completed.
    pub fn handle_surface_closed(&mut self) -> Result<(), AuthError> {
        if self.phase == Phase::Closed {
            return Ok(());
        }
        let had_session = self.ephemeral.is_some();
        self.phase = Phase::Closed;
        self.surface = None;

        if let Some(mut ephemeral) = self.ephemeral.take() {
            if let Err(err) = ephemeral.clear_storage() {
                tracing::warn!(%err, "Could not wipe ephemeral session storage");
            }
        }

        if had_session {
            // A live session without its channel is a lifecycle defect.
            ensure!(self.channel.take().is_some(), ChannelNotRegisteredSnafu);
        }

        tracing::debug!("Embedded SSO session closed");
        Ok(())
    }

    fn dispatch_response(&mut self, response_token: &str) -> Result<(), AuthError> {
        ensure!(
            is_valid_response_token(response_token),
            InvalidResponseTokenSnafu
        );

        let origin = self.provider_url.origin().ascii_serialization();
        self.sink
            .dispatch(&origin, response_token)
            .context(PlatformSnafu)
    }
}

/// Blank for trusted backend origins, the origin itself otherwise.
fn window_title(origin: &str, allowed_backend_origins: &[String]) -> String {
    if allowed_backend_origins.iter().any(|allowed| allowed == origin) {
        String::new()
    } else {
        origin.to_owned()
    }
}

/// The single sanctioned cross-session mutation: copy the named cookie,
/// scoped to the identity page's URL, and flush the target store.
fn copy_auth_cookie(
    from: &dyn SessionHandle,
    to: &mut dyn SessionHandle,
    cookie_name: &str,
    url: &Url,
) -> Result<(), PlatformError> {
    let cookies = from.cookies_named(cookie_name)?;
    for cookie in &cookies {
        if cookie.domain.is_some() {
            to.set_cookie(url, cookie)?;
        }
    }
    to.flush_cookies()
}

/// Marker used by the shell to recognize the SSO login window among frames
/// the web application asks to open.
pub const SSO_FRAME_NAME: &str = "APP_SSO";

/// Returns whether a frame name identifies the SSO login window.
pub fn is_sso_login_window(frame_name: &str) -> bool {
    frame_name == SSO_FRAME_NAME
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValidationResult;
    use crate::platform::Cookie;
    use assertr::prelude::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    const SCHEME: &str = "app-sso";
    const COOKIE: &str = "session-id";

    #[derive(Default)]
    struct SessionState {
        cookies: Vec<Cookie>,
        flushed: bool,
        cleared: bool,
        fail_set_cookie: bool,
    }

    #[derive(Clone, Default)]
    struct SharedSession(Rc<RefCell<SessionState>>);

    impl SessionHandle for SharedSession {
        fn cookies_named(&self, name: &str) -> Result<Vec<Cookie>, PlatformError> {
            Ok(self
                .0
                .borrow()
                .cookies
                .iter()
                .filter(|cookie| cookie.name == name)
                .cloned()
                .collect())
        }

        fn set_cookie(&mut self, _url: &Url, cookie: &Cookie) -> Result<(), PlatformError> {
            if self.0.borrow().fail_set_cookie {
                return Err(PlatformError::new("cookie store unavailable"));
            }
            self.0.borrow_mut().cookies.push(cookie.clone());
            Ok(())
        }

        fn flush_cookies(&mut self) -> Result<(), PlatformError> {
            self.0.borrow_mut().flushed = true;
            Ok(())
        }

        fn clear_storage(&mut self) -> Result<(), PlatformError> {
            self.0.borrow_mut().cleared = true;
            self.0.borrow_mut().cookies.clear();
            Ok(())
        }
    }

    struct SharedFactory(SharedSession);

    impl SessionFactory for SharedFactory {
        fn create_ephemeral(&mut self) -> Result<Box<dyn SessionHandle>, PlatformError> {
            Ok(Box::new(self.0.clone()))
        }
    }

    #[derive(Default)]
    struct SurfaceState {
        loaded: Vec<Url>,
        titles: Vec<String>,
        closed: bool,
    }

    #[derive(Clone, Default)]
    struct SharedSurface(Rc<RefCell<SurfaceState>>);

    impl Surface for SharedSurface {
        fn load_url(&mut self, url: &Url) -> Result<(), PlatformError> {
            self.0.borrow_mut().loaded.push(url.clone());
            Ok(())
        }

        fn set_title(&mut self, title: &str) {
            self.0.borrow_mut().titles.push(title.to_owned());
        }

        fn close(&mut self) {
            self.0.borrow_mut().closed = true;
        }
    }

    #[derive(Default)]
    struct SharedHost {
        surface: SharedSurface,
        created_with: RefCell<Vec<(SurfaceOptions, String)>>,
    }

    impl SurfaceHost for SharedHost {
        fn create_surface(
            &mut self,
            options: &SurfaceOptions,
            title: &str,
        ) -> Result<Box<dyn Surface>, PlatformError> {
            self.created_with
                .borrow_mut()
                .push((options.clone(), title.to_owned()));
            Ok(Box::new(self.surface.clone()))
        }
    }

    #[derive(Clone, Default)]
    struct SharedSink(Rc<RefCell<Vec<(String, String)>>>);

    impl ResponseSink for SharedSink {
        fn dispatch(&mut self, origin: &str, response_token: &str) -> Result<(), PlatformError> {
            self.0
                .borrow_mut()
                .push((origin.to_owned(), response_token.to_owned()));
            Ok(())
        }
    }

    struct Fixture {
        session: EmbeddedSsoSession,
        ephemeral: SharedSession,
        main: SharedSession,
        factory: SharedFactory,
        host: SharedHost,
        sink: SharedSink,
    }

    fn provider_url() -> Url {
        Url::parse("https://idp.example.com/saml/login").unwrap()
    }

    fn options() -> EmbeddedSsoOptions {
        EmbeddedSsoOptions {
            channel_scheme: SCHEME.to_owned(),
            auth_cookie_name: COOKIE.to_owned(),
            allowed_backend_origins: vec!["https://backend.example.com".to_owned()],
            surface: SurfaceOptions::default(),
        }
    }

    fn fixture() -> Fixture {
        let ephemeral = SharedSession::default();
        let main = SharedSession::default();
        let sink = SharedSink::default();
        let session = EmbeddedSsoSession::new(
            provider_url(),
            options(),
            Box::new(main.clone()),
            Box::new(sink.clone()),
        );
        Fixture {
            session,
            factory: SharedFactory(ephemeral.clone()),
            ephemeral,
            main,
            host: SharedHost::default(),
            sink,
        }
    }

    fn auth_cookie() -> Cookie {
        Cookie {
            name: COOKIE.to_owned(),
            value: "secret-session".to_owned(),
            domain: Some(".example.com".to_owned()),
            path: Some("/".to_owned()),
            secure: true,
            http_only: true,
        }
    }

    fn callback_url(session: &EmbeddedSsoSession, token: &str) -> String {
        format!(
            "{SCHEME}://response/?secret={}&type={token}",
            session.channel_secret().unwrap().as_str()
        )
    }

    #[test]
    fn init_loads_provider_page_with_external_origin_title() {
        let mut f = fixture();
        f.session.init(&mut f.factory, &mut f.host).unwrap();

        let created = f.host.created_with.borrow();
        assert_that(created.len()).is_equal_to(1);
        // External identity provider: the origin is shown to the user.
        assert_that(created[0].1.as_str()).is_equal_to("https://idp.example.com");
        assert_that(f.host.surface.0.borrow().loaded.clone())
            .is_equal_to(vec![provider_url()]);
        assert_that(f.session.channel_secret()).is_some();
    }

    #[test]
    fn init_twice_is_rejected() {
        let mut f = fixture();
        f.session.init(&mut f.factory, &mut f.host).unwrap();
        let second = f.session.init(&mut f.factory, &mut f.host);
        assert_that(matches!(second, Err(AuthError::AlreadyInProgress))).is_true();
    }

    #[test]
    fn trusted_backend_origin_gets_blank_title() {
        let mut f = fixture();
        f.session.provider_url = Url::parse("https://backend.example.com/sso/initiate").unwrap();
        f.session.init(&mut f.factory, &mut f.host).unwrap();
        assert_that(f.host.created_with.borrow()[0].1.as_str()).is_equal_to("");
    }

    #[test]
    fn authenticated_success_copies_cookie_and_reports() {
        let mut f = fixture();
        f.session.init(&mut f.factory, &mut f.host).unwrap();
        f.ephemeral.0.borrow_mut().cookies.push(auth_cookie());

        let url = callback_url(&f.session, AUTH_SUCCESS);
        f.session.handle_channel_request(&url).unwrap();

        let main = f.main.0.borrow();
        assert_that(main.cookies.clone()).is_equal_to(vec![auth_cookie()]);
        assert_that(main.flushed).is_true();
        assert_that(f.sink.0.borrow().clone()).is_equal_to(vec![(
            "https://idp.example.com".to_owned(),
            AUTH_SUCCESS.to_owned(),
        )]);
    }

    #[test]
    fn cookies_without_domain_are_not_transferred() {
        let mut f = fixture();
        f.session.init(&mut f.factory, &mut f.host).unwrap();
        let mut cookie = auth_cookie();
        cookie.domain = None;
        f.ephemeral.0.borrow_mut().cookies.push(cookie);

        let url = callback_url(&f.session, AUTH_SUCCESS);
        f.session.handle_channel_request(&url).unwrap();

        assert_that(f.main.0.borrow().cookies.len()).is_equal_to(0);
        // Still a success response: there was simply nothing to copy.
        assert_that(f.sink.0.borrow().last().unwrap().1.as_str()).is_equal_to(AUTH_SUCCESS);
    }

    #[test]
    fn cookie_transfer_failure_reports_cookie_error() {
        let mut f = fixture();
        f.session.init(&mut f.factory, &mut f.host).unwrap();
        f.ephemeral.0.borrow_mut().cookies.push(auth_cookie());
        f.main.0.borrow_mut().fail_set_cookie = true;

        let url = callback_url(&f.session, AUTH_SUCCESS);
        f.session.handle_channel_request(&url).unwrap();

        assert_that(f.sink.0.borrow().last().unwrap().1.as_str()).is_equal_to(AUTH_ERROR_COOKIE);
    }

    #[test]
    fn success_without_session_reports_session_not_available() {
        let mut f = fixture();
        // No init: there is no ephemeral session to take a cookie from.
        f.session.finalize_login(AUTH_SUCCESS).unwrap();
        assert_that(f.sink.0.borrow().last().unwrap().1.as_str())
            .is_equal_to(AUTH_ERROR_SESSION_NOT_AVAILABLE);
    }

    #[test]
    fn failure_tokens_pass_through_unchanged() {
        let mut f = fixture();
        f.session.init(&mut f.factory, &mut f.host).unwrap();

        let url = callback_url(&f.session, "AUTH_ERROR_FORBIDDEN");
        f.session.handle_channel_request(&url).unwrap();

        assert_that(f.sink.0.borrow().last().unwrap().1.as_str())
            .is_equal_to("AUTH_ERROR_FORBIDDEN");
        assert_that(f.main.0.borrow().cookies.len()).is_equal_to(0);
    }

    #[test]
    fn unauthenticated_requests_change_nothing() {
        let mut f = fixture();
        f.session.init(&mut f.factory, &mut f.host).unwrap();

        let forged = format!("{SCHEME}://response/?secret=guessed&type=AUTH_SUCCESS");
        f.session.handle_channel_request(&forged).unwrap();

        assert_that(f.sink.0.borrow().len()).is_equal_to(0);
        assert_that(f.session.channel_secret()).is_some();
    }

    #[test]
    fn finalize_is_first_call_wins() {
        let mut f = fixture();
        f.session.init(&mut f.factory, &mut f.host).unwrap();

        f.session.finalize_login("AUTH_ERROR_FORBIDDEN").unwrap();
        f.session.finalize_login(AUTH_SUCCESS).unwrap();

        let dispatched = f.sink.0.borrow().clone();
        assert_that(dispatched.len()).is_equal_to(1);
        assert_that(dispatched[0].1.as_str()).is_equal_to("AUTH_ERROR_FORBIDDEN");
    }

    #[test]
    fn invalid_response_token_shape_is_fatal_for_dispatch() {
        let mut f = fixture();
        f.session.init(&mut f.factory, &mut f.host).unwrap();

        let result = f.session.finalize_login("auth<script>");
        assert_that(matches!(result, Err(AuthError::InvalidResponseToken))).is_true();
        assert_that(f.sink.0.borrow().len()).is_equal_to(0);
    }

    #[test]
    fn teardown_wipes_storage_and_is_idempotent() {
        let mut f = fixture();
        f.session.init(&mut f.factory, &mut f.host).unwrap();

        f.session.handle_surface_closed().unwrap();
        assert_that(f.ephemeral.0.borrow().cleared).is_true();
        assert_that(f.session.channel_secret()).is_none();

        // A second close is a no-op, not a double-unregistration.
        f.session.handle_surface_closed().unwrap();
    }

    #[test]
    fn teardown_before_init_is_safe() {
        let mut f = fixture();
        f.session.handle_surface_closed().unwrap();
        assert_that(f.ephemeral.0.borrow().cleared).is_false();
    }

    #[test]
    fn callbacks_after_close_are_ignored() {
        let mut f = fixture();
        f.session.init(&mut f.factory, &mut f.host).unwrap();
        let url = callback_url(&f.session, AUTH_SUCCESS);

        f.session.handle_surface_closed().unwrap();
        f.session.handle_channel_request(&url).unwrap();

        assert_that(f.sink.0.borrow().len()).is_equal_to(0);
    }

    #[test]
    fn navigation_to_oversized_origin_is_refused() {
        let mut f = fixture();
        f.session.init(&mut f.factory, &mut f.host).unwrap();

        let oversized = format!("https://{}.example.com/login", "a".repeat(300));
        let target = Url::parse(&oversized).unwrap();
        assert_that(f.session.handle_will_navigate(&target)).is_false();
        // The title still shows the origin the page tried to reach.
        assert_that(f.host.surface.0.borrow().titles.last().unwrap().as_str())
            .is_equal_to(target.origin().ascii_serialization().as_str());

        let ok = Url::parse("https://other-idp.example.com/login").unwrap();
        assert_that(f.session.handle_will_navigate(&ok)).is_true();
        assert_that(f.host.surface.0.borrow().titles.last().unwrap().as_str())
            .is_equal_to("https://other-idp.example.com");
    }

    #[test]
    fn sso_frame_name_is_recognized() {
        assert_that(is_sso_login_window(SSO_FRAME_NAME)).is_true();
        assert_that(is_sso_login_window("random")).is_false();
    }

    #[test]
    fn dispatched_origin_passes_message_origin_validation() {
        let mut f = fixture();
        f.session.init(&mut f.factory, &mut f.host).unwrap();
        f.session.finalize_login("AUTH_ERROR_FORBIDDEN").unwrap();

        let (origin, _) = f.sink.0.borrow().last().cloned().unwrap();
        assert_that(crate::validate_message_origin(&origin, provider_url().as_str())).is_true();
    }

    #[test]
    fn validation_result_gates_before_navigation() {
        // The orchestrating shell validates before constructing a session;
        // this pins the contract the constructor documents.
        let result: ValidationResult =
            crate::validate_sso_redirect_url(provider_url().as_str(), &[]);
        assert_that(result.is_valid).is_true();
    }
}
