//! Webhook URLs handed to the external job system.
//!
//! When a secret is configured each URL carries `?token=`, an HMAC-SHA256 of
//! the webhook scope encoded as unpadded base64url. Receivers verify the token
//! before applying a result.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Webhook endpoints, relative to the webhook base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookScope {
    StoryPage,
    ModelTraining,
}

impl WebhookScope {
    pub fn path(&self) -> &'static str {
        match self {
            WebhookScope::StoryPage => "story/page",
            WebhookScope::ModelTraining => "model/training",
        }
    }
}

#[derive(Clone)]
pub struct WebhookSigner {
    base_url: String,
    secret: Option<Vec<u8>>,
}

impl WebhookSigner {
    pub fn new(base_url: impl Into<String>, secret: Option<&str>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.filter(|s| !s.is_empty()).map(|s| s.as_bytes().to_vec()),
        }
    }

    pub fn is_enforced(&self) -> bool {
        self.secret.is_some()
    }

    fn mac(&self, secret: &[u8], scope: WebhookScope) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(secret).ok()?;
        mac.update(scope.path().as_bytes());
        Some(mac)
    }

    pub fn token(&self, scope: WebhookScope) -> Option<String> {
        let secret = self.secret.as_deref()?;
        let mac = self.mac(secret, scope)?;
        Some(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    /// Full webhook URL for `scope`, signed when a secret is set.
    pub fn url(&self, scope: WebhookScope) -> String {
        let url = format!("{}/{}", self.base_url, scope.path());
        match self.token(scope) {
            Some(token) => format!("{}?token={}", url, token),
            None => url,
        }
    }

    /// Constant-time check of a received token. Always passes without a secret.
    pub fn verify(&self, scope: WebhookScope, token: Option<&str>) -> bool {
        let Some(secret) = self.secret.as_deref() else {
            return true;
        };
        let Some(token) = token else {
            return false;
        };
        let Ok(received) = URL_SAFE_NO_PAD.decode(token) else {
            return false;
        };
        self.mac(secret, scope)
            .map(|mac| mac.verify_slice(&received).is_ok())
            .unwrap_or(false)
    }
}
