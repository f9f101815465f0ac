use rand::Rng;

/// Cryptographically secure token used as the `state` parameter of an
/// outbound auth request to detect CSRF on the inbound callback.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CsrfToken {
    csrf_token: String,
}

impl CsrfToken {
    /// Generate a new CSRF token from 32 bytes of cryptographically secure
    /// random data, hex encoded as a 64 character string.
    pub fn new() -> Self {
        let mut rng = rand::rng();
        let bytes: [u8; 32] = rng.random();
        let csrf_token = hex::encode(bytes);

        Self { csrf_token }
    }

    pub fn as_str(&self) -> &str {
        &self.csrf_token
    }
}

impl Default for CsrfToken {
    fn default() -> Self {
        Self::new()
    }
}
