//! Per-provider flow selection and security posture.
//!
//! The policy is a pure decision layer: it reads nothing but its own
//! construction-time options. The operator override that forces the external
//! flow everywhere is threaded in by the embedding shell (which reads the
//! environment once at startup) instead of being read ambiently here, so the
//! decisions stay deterministic and testable.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const ENHANCED_TIMEOUT: Duration = Duration::from_secs(3 * 60);
const MAXIMUM_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// An identity provider category, as requested by the hosted web
/// application.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AuthProvider {
    Sso,
    Saml,
    /// High-assurance federation; always leaves the embedded surface.
    EnterpriseIdentity,
    OAuth,
    /// Anything the web application sends that we do not recognize.
    Other(String),
}

impl fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthProvider::Sso => f.write_str("sso"),
            AuthProvider::Saml => f.write_str("saml"),
            AuthProvider::EnterpriseIdentity => f.write_str("enterprise_identity"),
            AuthProvider::OAuth => f.write_str("oauth"),
            AuthProvider::Other(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFlowType {
    EmbeddedWindow,
    ExternalBrowser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecurityLevel {
    Standard,
    Enhanced,
    Maximum,
}

/// Flow parameters for one provider. Derived deterministically, recomputed
/// per use, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFlowConfiguration {
    pub provider: AuthProvider,
    pub flow_type: AuthFlowType,
    pub security_level: SecurityLevel,
    pub allowed_origins: Vec<String>,
    pub timeout: Duration,
    pub require_external_browser: bool,
}

/// Construction-time inputs of the policy layer.
#[derive(Debug, Clone)]
pub struct PolicyOptions {
    /// The application's own backend origins, allow-listed for SSO.
    pub allowed_origins: Vec<String>,

    /// Base name of the application's custom URL scheme; the auth callback
    /// scheme is derived from it.
    pub custom_protocol: String,

    /// Operator escape hatch forcing the external flow for every provider.
    pub force_external_auth: bool,
}

/// Creation parameters for the isolated login surface, derived from the
/// provider's security level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceOptions {
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
    pub modal: bool,
    pub always_on_top: bool,
    pub isolated_context: bool,
    pub sandboxed: bool,
    pub native_integration: bool,
    pub allow_plugins: bool,
    pub allow_devtools: bool,
    pub spellcheck: bool,
    pub background_throttling: bool,
    /// Storage partition for the surface. `None` means the host's ephemeral
    /// default; `Some` is a unique, never-reused identifier.
    pub partition: Option<String>,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            width: 480,
            height: 600,
            resizable: false,
            modal: true,
            always_on_top: true,
            isolated_context: true,
            sandboxed: true,
            native_integration: false,
            allow_plugins: false,
            allow_devtools: false,
            spellcheck: true,
            background_throttling: true,
            partition: None,
        }
    }
}

/// Decides, per identity provider, which flow to use and with what security
/// posture.
#[derive(Debug, Clone)]
pub struct AuthFlowPolicy {
    options: PolicyOptions,
}

impl AuthFlowPolicy {
    pub fn new(options: PolicyOptions) -> Self {
        Self { options }
    }

    /// The recommended flow configuration for `provider`.
    pub fn get_flow_config(&self, provider: &AuthProvider) -> AuthFlowConfiguration {
        let base = AuthFlowConfiguration {
            provider: provider.clone(),
            flow_type: AuthFlowType::EmbeddedWindow,
            security_level: SecurityLevel::Standard,
            allowed_origins: self.options.allowed_origins.clone(),
            timeout: DEFAULT_TIMEOUT,
            require_external_browser: false,
        };

        match provider {
            AuthProvider::Sso | AuthProvider::Saml => AuthFlowConfiguration {
                security_level: SecurityLevel::Enhanced,
                timeout: ENHANCED_TIMEOUT,
                ..base
            },
            AuthProvider::EnterpriseIdentity => AuthFlowConfiguration {
                security_level: SecurityLevel::Maximum,
                timeout: MAXIMUM_TIMEOUT,
                require_external_browser: true,
                ..base
            },
            AuthProvider::OAuth => AuthFlowConfiguration {
                flow_type: AuthFlowType::ExternalBrowser,
                ..base
            },
            AuthProvider::Other(_) => {
                tracing::warn!(%provider, "Unknown auth provider, using default configuration");
                base
            }
        }
    }

    /// Whether the external browser must be used for `provider`. The global
    /// override takes precedence over per-provider configuration.
    pub fn should_use_external_browser(&self, provider: &AuthProvider) -> bool {
        if self.options.force_external_auth {
            tracing::info!(%provider, "Forcing external browser due to global override");
            return true;
        }

        let config = self.get_flow_config(provider);
        config.security_level == SecurityLevel::Maximum || config.require_external_browser
    }

    /// Surface creation parameters for an embedded attempt against
    /// `provider`. Enhanced and maximum levels additionally get a unique,
    /// never-reused partition and disabled spellcheck and throttling.
    pub fn secure_surface_options(&self, provider: &AuthProvider) -> SurfaceOptions {
        let config = self.get_flow_config(provider);
        let mut options = SurfaceOptions::default();

        if config.security_level >= SecurityLevel::Enhanced {
            options.partition = Some(unique_partition(provider));
            options.spellcheck = false;
            options.background_throttling = false;
        }

        options
    }

    /// Strict origin membership check against the provider's allowed
    /// origins. Defense in depth, separate from the structural validation
    /// in [`crate::validate_sso_redirect_url`].
    pub fn is_url_allowed(&self, url: &str, provider: &AuthProvider) -> bool {
        let config = self.get_flow_config(provider);

        match Url::parse(url) {
            Ok(parsed) => {
                let origin = parsed.origin().ascii_serialization();
                config.allowed_origins.iter().any(|allowed| *allowed == origin)
            }
            Err(err) => {
                tracing::warn!(%provider, %err, "Invalid URL for provider");
                false
            }
        }
    }

    /// The OS-level callback URL the external flow hands to the provider as
    /// `redirect_uri`.
    pub fn callback_url(&self, provider: &AuthProvider) -> Result<Url, url::ParseError> {
        Url::parse(&format!(
            "{}://callback/{provider}",
            self.auth_callback_scheme()
        ))
    }

    /// The custom scheme registered with the OS for auth callbacks.
    pub fn auth_callback_scheme(&self) -> String {
        format!("{}-auth", self.options.custom_protocol)
    }
}

// The counter keeps partitions distinct even when two attempts start within
// the clock's resolution.
static ATTEMPT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn unique_partition(provider: &AuthProvider) -> String {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    let attempt = ATTEMPT_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("auth-{provider}-{nanos}-{attempt}")
}
