//! URL and origin validation for SSO redirects.
//!
//! The SSO flow has to navigate to external identity provider domains (SAML,
//! OAuth, OIDC providers) which are customer-configured and not known in
//! advance, so external providers cannot be allow-listed. They get structural
//! checks instead (HTTPS, well-formed FQDN, non-trivial path or query, no
//! dangerous schemes), while the application's own backend origins stay on a
//! strict allow-list combined with a path-shape check.

use url::Url;

/// Outcome of a single redirect-URL check. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sanitized_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationResult {
    fn valid(url: Url) -> Self {
        Self {
            is_valid: true,
            sanitized_url: Some(String::from(url)),
            reason: None,
        }
    }

    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            sanitized_url: None,
            reason: Some(reason.into()),
        }
    }
}

const MAX_HOSTNAME_LENGTH: usize = 253;
const MAX_LABEL_LENGTH: usize = 63;

/// Returns whether both URLs share the same host (hostname and port).
/// Malformed input on either side yields `false`.
pub fn is_matching_host(url_a: &str, url_b: &str) -> bool {
    match (Url::parse(url_a), Url::parse(url_b)) {
        (Ok(a), Ok(b)) => a.host_str() == b.host_str() && a.port() == b.port(),
        _ => false,
    }
}

/// Checks the raw URL string for patterns that indicate a malicious URL.
///
/// Suspicious URLs are rejected outright rather than sanitized; there is no
/// safe rewrite of a `javascript:` scheme or a homograph domain.
pub fn contains_suspicious_patterns(url: &str) -> bool {
    let lowered = url.to_ascii_lowercase();

    // Dangerous schemes, anywhere in the string so that nested URLs in query
    // parameters are caught as well.
    if lowered.contains("javascript:")
        || lowered.contains("data:")
        || lowered.contains("file:")
        || lowered.contains("ftp:")
    {
        return true;
    }

    // Percent-encoded double slashes and a percent-encoded "javascript".
    if lowered.contains("%2f%2f") || lowered.contains("%6a%61%76%61%73%63%72%69%70%74") {
        return true;
    }

    // Anything outside printable ASCII.
    if url.bytes().any(|byte| !(0x20..=0x7e).contains(&byte)) {
        return true;
    }

    // Punycode labels, used for homograph attacks.
    lowered.contains("xn--")
}

/// Returns whether a path matches one of the known SSO endpoint shapes.
pub fn is_valid_sso_path(path: &str) -> bool {
    const SSO_PATH_PREFIXES: [&str; 6] =
        ["/sso/", "/auth/", "/login/", "/oauth/", "/saml/", "/oidc/"];

    SSO_PATH_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
        || is_versioned_api_sso_path(path)
}

/// Accepts `/api/v{n}/sso/...` and `/api/v{n}/auth/...`.
fn is_versioned_api_sso_path(path: &str) -> bool {
    let Some(rest) = path.strip_prefix("/api/v") else {
        return false;
    };
    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return false;
    }
    let rest = &rest[digits..];
    rest.starts_with("/sso/") || rest.starts_with("/auth/")
}

/// Returns whether a hostname is a well-formed multi-label FQDN.
///
/// IP literals and single-label names are rejected; an identity provider
/// reachable only by IP or bare hostname is not something we navigate to.
pub fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() {
        return false;
    }
    if is_ipv4_literal(hostname) || is_ipv6_literal(hostname) {
        return false;
    }
    if !hostname.contains('.') {
        return false;
    }
    hostname.split('.').all(is_valid_label)
}

fn is_valid_label(label: &str) -> bool {
    if label.is_empty() || label.len() > MAX_LABEL_LENGTH {
        return false;
    }
    let bytes = label.as_bytes();
    if bytes[0] == b'-' || bytes[bytes.len() - 1] == b'-' {
        return false;
    }
    bytes
        .iter()
        .all(|byte| byte.is_ascii_alphanumeric() || *byte == b'-')
}

// Shape check only; `256.1.1.1` is still an IP literal as far as rejection
// is concerned.
fn is_ipv4_literal(hostname: &str) -> bool {
    let octets: Vec<&str> = hostname.split('.').collect();
    octets.len() == 4
        && octets
            .iter()
            .all(|octet| !octet.is_empty() && octet.len() <= 3 && octet.bytes().all(|b| b.is_ascii_digit()))
}

fn is_ipv6_literal(hostname: &str) -> bool {
    let hostname = hostname
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(hostname);
    hostname.contains(':')
        && hostname
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c == ':')
}

/// Validates whether a URL is safe to use as an SSO redirect target.
///
/// Checks run in a fixed order and the first failure wins:
///
/// 1. The URL must parse.
/// 2. Only HTTPS is accepted.
/// 3. No suspicious patterns in the raw string.
/// 4. Hostnames longer than 253 characters are refused.
/// 5. URLs on an allowed backend origin must use a known SSO path shape.
/// 6. Any other URL is treated as an external identity provider: its
///    hostname must be a well-formed FQDN and it must carry a non-root path
///    or a query string.
pub fn validate_sso_redirect_url(url: &str, allowed_origins: &[String]) -> ValidationResult {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => return ValidationResult::invalid("Invalid URL format"),
    };

    if parsed.scheme() != "https" {
        return ValidationResult::invalid("Only HTTPS protocol is allowed for SSO redirects");
    }

    if contains_suspicious_patterns(url) {
        return ValidationResult::invalid("URL contains suspicious patterns");
    }

    let hostname = parsed.host_str().unwrap_or_default();
    if hostname.len() > MAX_HOSTNAME_LENGTH {
        return ValidationResult::invalid("Hostname exceeds maximum allowed length");
    }

    let origin = parsed.origin().ascii_serialization();
    if allowed_origins.iter().any(|allowed| *allowed == origin) {
        if !is_valid_sso_path(parsed.path()) {
            return ValidationResult::invalid("Invalid SSO path detected for Wire backend");
        }
    } else {
        if !is_valid_hostname(hostname) {
            return ValidationResult::invalid(
                "Invalid hostname format for external identity provider",
            );
        }

        // Identity providers use paths like /saml/login or /oauth/authorize;
        // a bare domain is not a login page.
        if parsed.path() == "/" && parsed.query().unwrap_or_default().is_empty() {
            return ValidationResult::invalid(
                "External identity provider URL must include a path or query parameters",
            );
        }
    }

    ValidationResult::valid(parsed)
}

/// Strict origin equality of two URLs, used to confirm that an inbound
/// message claiming to come from the identity provider actually originates
/// from the page that was navigated to.
pub fn validate_message_origin(message_origin: &str, expected_origin: &str) -> bool {
    match (Url::parse(message_origin), Url::parse(expected_origin)) {
        (Ok(message), Ok(expected)) => message.origin() == expected.origin(),
        _ => false,
    }
}
