//! Signed session id cookies: `<id>.<base64 HMAC-SHA256 of id>`.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct CookieSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for CookieSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieSigner").finish_non_exhaustive()
    }
}

impl CookieSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    pub fn new_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length")
    }

    pub fn sign(&self, id: &str) -> String {
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let mut mac = self.mac();
        mac.update(id.as_bytes());
        let signature = engine.encode(mac.finalize().into_bytes());
        format!("{id}.{signature}")
    }

    /// Returns the session id when the signature matches.
    pub fn verify(&self, value: &str) -> Option<String> {
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let (id, signature) = value.rsplit_once('.')?;
        if id.is_empty() {
            return None;
        }
        let signature = engine.decode(signature).ok()?;
        let mut mac = self.mac();
        mac.update(id.as_bytes());
        mac.verify_slice(&signature).ok()?;
        Some(id.to_string())
    }
}
