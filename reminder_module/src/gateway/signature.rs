use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};

const ISSUER: &str = "Upstash";

/// Tolerated clock skew against the signer for `nbf` and `exp`.
const CLOCK_SKEW_LEEWAY_SECS: u64 = 5;

#[derive(Debug, Deserialize)]
struct DeliveryClaims {
    body: String,
}

/// Current/next signing key pair used to verify `Upstash-Signature` tokens.
/// Both keys are tried so the pair can be rotated without downtime.
#[derive(Debug, Clone, Default)]
pub struct SigningKeys {
    current: Option<String>,
    next: Option<String>,
    subject: Option<String>,
}

impl SigningKeys {
    pub fn new(current: Option<String>, next: Option<String>) -> Self {
        Self {
            current: non_empty(current),
            next: non_empty(next),
            subject: None,
        }
    }

    /// Also require the token's `sub` claim to equal the callback URL.
    pub fn with_subject(mut self, callback_url: Option<String>) -> Self {
        self.subject = non_empty(callback_url);
        self
    }

    pub fn is_configured(&self) -> bool {
        self.current.is_some() || self.next.is_some()
    }

    pub(super) fn verify(&self, signature: Option<&str>, body: &[u8]) -> Result<(), &'static str> {
        if !self.is_configured() {
            return Ok(());
        }
        let token = signature
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or("missing_signature")?;

        for key in [self.current.as_deref(), self.next.as_deref()].into_iter().flatten() {
            match self.verify_with_key(token, key, body) {
                Err("invalid_signature") => continue,
                // A token that verifies under this key settles the question.
                settled => return settled,
            }
        }
        Err("invalid_signature")
    }

    fn verify_with_key(&self, token: &str, key: &str, body: &[u8]) -> Result<(), &'static str> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.leeway = CLOCK_SKEW_LEEWAY_SECS;
        validation.sub = self.subject.clone();

        let data = decode::<DeliveryClaims>(token, &DecodingKey::from_secret(key.as_bytes()), &validation)
            .map_err(|_| "invalid_signature")?;

        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(body));
        if data.claims.body.trim_end_matches('=') != expected {
            return Err("body_mismatch");
        }
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    const BODY: &[u8] = br#"{"chatId":"42","taskId":"t1","type":"reminder"}"#;
    const CALLBACK: &str = "https://reminders.example.com/api/callback";

    #[derive(Serialize)]
    struct Claims {
        iss: String,
        sub: String,
        exp: i64,
        nbf: i64,
        iat: i64,
        jti: String,
        body: String,
    }

    fn token(key: &str, body: &[u8], issuer: &str, exp_offset: i64) -> String {
        signed_at(key, body, issuer, exp_offset, -5)
    }

    fn signed_at(key: &str, body: &[u8], issuer: &str, exp_offset: i64, nbf_offset: i64) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: issuer.to_string(),
            sub: CALLBACK.to_string(),
            exp: now + exp_offset,
            nbf: now + nbf_offset,
            iat: now + nbf_offset,
            jti: "msg_1".to_string(),
            body: URL_SAFE_NO_PAD.encode(Sha256::digest(body)),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(key.as_bytes()))
            .unwrap()
    }

    fn keys() -> SigningKeys {
        SigningKeys::new(Some("current-key".into()), Some("next-key".into()))
            .with_subject(Some(CALLBACK.into()))
    }

    #[test]
    fn unconfigured_keys_accept_anything() {
        let keys = SigningKeys::new(None, Some("  ".into()));
        assert!(!keys.is_configured());
        assert!(keys.verify(None, BODY).is_ok());
    }

    #[test]
    fn accepts_current_and_next_keys() {
        let keys = keys();
        assert!(keys.verify(Some(&token("current-key", BODY, ISSUER, 300)), BODY).is_ok());
        assert!(keys.verify(Some(&token("next-key", BODY, ISSUER, 300)), BODY).is_ok());
    }

    #[test]
    fn rejects_missing_or_foreign_signatures() {
        let keys = keys();
        assert_eq!(keys.verify(None, BODY), Err("missing_signature"));
        assert_eq!(
            keys.verify(Some(&token("other-key", BODY, ISSUER, 300)), BODY),
            Err("invalid_signature")
        );
        assert_eq!(
            keys.verify(Some(&token("current-key", BODY, "Someone", 300)), BODY),
            Err("invalid_signature")
        );
        assert_eq!(
            keys.verify(Some(&token("current-key", BODY, ISSUER, -120)), BODY),
            Err("invalid_signature")
        );
    }

    #[test]
    fn tolerates_small_clock_skew_only() {
        let keys = keys();
        let slightly_ahead = signed_at("current-key", BODY, ISSUER, 300, 2);
        assert!(keys.verify(Some(&slightly_ahead), BODY).is_ok());
        let far_ahead = signed_at("current-key", BODY, ISSUER, 300, 120);
        assert_eq!(keys.verify(Some(&far_ahead), BODY), Err("invalid_signature"));
    }

    #[test]
    fn rejects_tampered_body() {
        let keys = keys();
        let signed = token("current-key", BODY, ISSUER, 300);
        let tampered = br#"{"chatId":"43","taskId":"t1","type":"reminder"}"#;
        assert_eq!(keys.verify(Some(&signed), tampered), Err("body_mismatch"));
    }

    #[test]
    fn rejects_wrong_subject() {
        let keys = SigningKeys::new(Some("current-key".into()), None)
            .with_subject(Some("https://elsewhere.example.com/api/callback".into()));
        let signed = token("current-key", BODY, ISSUER, 300);
        assert_eq!(keys.verify(Some(&signed), BODY), Err("invalid_signature"));
    }
}
