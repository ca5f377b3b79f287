//! Password authentication.
//!
//! Supports cleartext, md5 and `SCRAM-SHA-256` SASL authentication.
//!
//! <https://www.postgresql.org/docs/current/sasl-authentication.html>
use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use md5::Md5;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::common::verbose;

type HmacSha256 = Hmac<Sha256>;

/// The only SASL mechanism supported.
pub(crate) const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// An error when authenticating to the backend.
pub enum AuthError {
    /// Backend requested an authentication method that is not supported.
    Unsupported(&'static str),
    /// Backend requested a password, but none is configured.
    MissingPassword,
    /// SCRAM exchange failed.
    Scram(&'static str),
}

impl std::error::Error for AuthError { }

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Unsupported(method) => write!(f, "unsupported authentication method: {method}"),
            AuthError::MissingPassword => f.write_str("password is required but not provided"),
            AuthError::Scram(reason) => write!(f, "SCRAM authentication failed: {reason}"),
        }
    }
}

impl fmt::Debug for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Hash a password for `AuthenticationMD5Password`.
///
/// `concat('md5', md5(concat(md5(concat(password, username)), random-salt)))`
pub(crate) fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let mut md5 = Md5::new();
    md5.update(password.as_bytes());
    md5.update(user.as_bytes());
    let inner = format!("{:x}", md5.finalize());

    let mut md5 = Md5::new();
    md5.update(inner.as_bytes());
    md5.update(salt);
    format!("md5{:x}", md5.finalize())
}

/// Client side of `SCRAM-SHA-256` exchange, without channel binding.
pub(crate) struct ScramSha256 {
    password: String,
    client_first_bare: String,
    state: State,
}

enum State {
    Initial,
    Sent { auth_message: String, salted_password: [u8; 32] },
    Done,
}

/// gs2 header without channel binding, `biws` is its base64.
const GS2_HEADER: &str = "n,,";
const GS2_HEADER_B64: &str = "biws";

impl ScramSha256 {
    /// Postgres ignores the username in SCRAM messages, the startup user is used instead.
    pub fn new(password: &str) -> Self {
        let nonce = STANDARD.encode(rand::random::<[u8; 18]>());
        Self::with_nonce("", password, &nonce)
    }

    fn with_nonce(user: &str, password: &str, nonce: &str) -> Self {
        Self {
            password: password.to_owned(),
            client_first_bare: format!("n={user},r={nonce}"),
            state: State::Initial,
        }
    }

    /// `client-first-message` for `SASLInitialResponse`.
    pub fn client_first(&self) -> Vec<u8> {
        format!("{GS2_HEADER}{}", self.client_first_bare).into_bytes()
    }

    /// Process `server-first-message` and returns `client-final-message`.
    pub fn client_final(&mut self, server_first: &[u8]) -> Result<Vec<u8>, AuthError> {
        if !matches!(self.state, State::Initial) {
            return Err(AuthError::Scram("unexpected server-first-message"));
        }

        let server_first = std::str::from_utf8(server_first)
            .map_err(|_| AuthError::Scram("server-first-message is not utf8"))?;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;

        for attr in server_first.split(',') {
            match attr.split_once('=') {
                Some(("r", value)) => nonce = Some(value),
                Some(("s", value)) => salt = Some(value),
                Some(("i", value)) => iterations = Some(value),
                _ => {}
            }
        }

        let nonce = nonce.ok_or(AuthError::Scram("missing nonce"))?;
        let salt = salt.ok_or(AuthError::Scram("missing salt"))?;
        let iterations: u32 = iterations
            .and_then(|e| e.parse().ok())
            .filter(|e| *e > 0)
            .ok_or(AuthError::Scram("invalid iteration count"))?;

        let client_nonce = self.client_first_bare
            .split_once(",r=")
            .map(|(_, e)| e)
            .unwrap_or_default();
        if !nonce.starts_with(client_nonce) || nonce.len() == client_nonce.len() {
            return Err(AuthError::Scram("server nonce does not extend client nonce"));
        }

        let salt = STANDARD.decode(salt).map_err(|_| AuthError::Scram("salt is not base64"))?;
        let salted_password = pbkdf2(self.password.as_bytes(), &salt, iterations)?;

        let client_key = hmac(&salted_password, b"Client Key")?;
        let mut stored_key = [0u8; 32];
        stored_key.copy_from_slice(&Sha256::digest(client_key));

        let client_final_without_proof = format!("c={GS2_HEADER_B64},r={nonce}");
        let auth_message = format!(
            "{},{server_first},{client_final_without_proof}",
            self.client_first_bare
        );

        let signature = hmac(&stored_key, auth_message.as_bytes())?;
        let mut proof = client_key;
        for (p, s) in proof.iter_mut().zip(signature) {
            *p ^= s;
        }

        self.state = State::Sent { auth_message, salted_password };

        Ok(format!("{client_final_without_proof},p={}", STANDARD.encode(proof)).into_bytes())
    }

    /// Verify `server-final-message` signature.
    pub fn verify(&mut self, server_final: &[u8]) -> Result<(), AuthError> {
        let State::Sent { auth_message, salted_password } = std::mem::replace(&mut self.state, State::Done) else {
            return Err(AuthError::Scram("unexpected server-final-message"));
        };

        let server_final = std::str::from_utf8(server_final)
            .map_err(|_| AuthError::Scram("server-final-message is not utf8"))?;

        if server_final.starts_with("e=") {
            verbose!("SCRAM server error: {server_final}");
            return Err(AuthError::Scram("server rejected the proof"));
        }

        let verifier = server_final
            .split(',')
            .find_map(|e| e.strip_prefix("v="))
            .ok_or(AuthError::Scram("missing server signature"))?;
        let verifier = STANDARD
            .decode(verifier)
            .map_err(|_| AuthError::Scram("server signature is not base64"))?;

        let server_key = hmac(&salted_password, b"Server Key")?;
        let signature = hmac(&server_key, auth_message.as_bytes())?;

        if verifier != signature {
            return Err(AuthError::Scram("server signature mismatch"));
        }

        Ok(())
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<[u8; 32], AuthError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| AuthError::Scram("invalid key length"))?;
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// `Hi()` from RFC 5802, PBKDF2 with HMAC-SHA-256 and a single output block.
fn pbkdf2(password: &[u8], salt: &[u8], iterations: u32) -> Result<[u8; 32], AuthError> {
    let mut mac = HmacSha256::new_from_slice(password).map_err(|_| AuthError::Scram("invalid key length"))?;
    mac.update(salt);
    mac.update(&1u32.to_be_bytes());

    let mut u = [0u8; 32];
    u.copy_from_slice(&mac.finalize().into_bytes());
    let mut out = u;

    for _ in 1..iterations {
        u = hmac(password, &u)?;
        for (o, u) in out.iter_mut().zip(u) {
            *o ^= u;
        }
    }

    Ok(out)
}
