//! In-memory bearer-token sessions.
//!
//! Token shape: `base64url(payload) + "." + hex(HMAC-SHA256(secret, payload))`.
//! The secret is regenerated every process start, so tokens never outlive a
//! restart; sessions themselves live only in memory with a 24h TTL.

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_TTL: Duration = Duration::hours(24);

#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: Uuid,
    pub current_username: String,
    pub token: String,
    pub observed_ip: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct TokenPayload {
    user_id: Uuid,
    nonce: [u8; 16],
    issued_at: DateTime<Utc>,
}

pub struct TokenSigner {
    secret: [u8; 32],
}

impl TokenSigner {
    /// A fresh random secret, regenerated once per process start.
    pub fn new() -> Self {
        let mut secret = [0u8; 32];
        getrandom::fill(&mut secret).expect("failed to generate session secret");
        TokenSigner { secret }
    }

    pub fn mint(&self, user_id: Uuid) -> String {
        let mut nonce = [0u8; 16];
        getrandom::fill(&mut nonce).expect("failed to generate session nonce");
        let payload = TokenPayload {
            user_id,
            nonce,
            issued_at: Utc::now(),
        };
        let payload_bytes = serde_json::to_vec(&payload).expect("payload serializes");
        let payload_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&payload_bytes);
        let mac = self.sign(payload_b64.as_bytes());
        format!("{payload_b64}.{mac}")
    }

    /// Returns the embedded user id iff the signature over the payload is valid.
    pub fn verify(&self, token: &str) -> Option<Uuid> {
        let token = token.strip_prefix("Bearer ").unwrap_or(token);
        let (payload_b64, mac_hex) = token.split_once('.')?;
        let expected = self.sign(payload_b64.as_bytes());
        if !constant_time_eq(expected.as_bytes(), mac_hex.as_bytes()) {
            return None;
        }
        let payload_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
        let payload: TokenPayload = serde_json::from_slice(&payload_bytes).ok()?;
        Some(payload.user_id)
    }

    fn sign(&self, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(payload);
        hex_encode(&mac.finalize().into_bytes())
    }
}

impl Default for TokenSigner {
    fn default() -> Self {
        Self::new()
    }
}

pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_and_verify_round_trip() {
        let signer = TokenSigner::new();
        let id = Uuid::new_v4();
        let token = signer.mint(id);
        assert_eq!(signer.verify(&token), Some(id));
    }

    #[test]
    fn bearer_prefix_is_stripped() {
        let signer = TokenSigner::new();
        let id = Uuid::new_v4();
        let token = format!("Bearer {}", signer.mint(id));
        assert_eq!(signer.verify(&token), Some(id));
    }

    #[test]
    fn tampered_signature_fails() {
        let signer = TokenSigner::new();
        let token = signer.mint(Uuid::new_v4());
        let mut tampered = token.clone();
        tampered.push('f');
        assert_eq!(signer.verify(&tampered), None);
    }

    #[test]
    fn different_secret_fails() {
        let a = TokenSigner::new();
        let b = TokenSigner::new();
        let token = a.mint(Uuid::new_v4());
        assert_eq!(b.verify(&token), None);
    }
}
