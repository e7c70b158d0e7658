//! HS256 authentication for the WebSocket `login` request.
//!
//! The venue accepts a login signed with the account's secret key:
//!
//! - `algo`: always `HS256`
//! - `pKey`: the API key
//! - `nonce`: a random string chosen per login
//! - `signature`: hex-encoded HMAC-SHA256 of the nonce, keyed by the secret
//!
//! # Example
//!
//! ```rust
//! use hitbtc_replica::client::auth::Signer;
//! use hitbtc_replica::config::Credentials;
//!
//! let signer = Signer::new(&Credentials::new("api-key", "secret"));
//! let params = signer.login_params().expect("Failed to sign");
//!
//! assert_eq!(params.algo, "HS256");
//! assert_eq!(params.signature.len(), 64);
//! ```

use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::Sha256;

use crate::config::Credentials;
use crate::error::Error;
use crate::types::messages::LoginParams;

type HmacSha256 = Hmac<Sha256>;

/// Length of generated login nonces
pub const NONCE_LEN: usize = 32;

/// HMAC-SHA256 signer for the `login` request
#[derive(Clone)]
pub struct Signer {
    api_key: String,
    secret_key: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

impl Signer {
    /// Create a signer from credentials
    pub fn new(credentials: &Credentials) -> Self {
        Self {
            api_key: credentials.api_key().to_string(),
            secret_key: credentials.secret_key().to_string(),
        }
    }

    /// Sign a nonce and return the hex-encoded signature
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] if the secret cannot key the MAC.
    pub fn sign(&self, nonce: &str) -> Result<String, Error> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| Error::Authentication(e.to_string()))?;
        mac.update(nonce.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Build `login` parameters with a fresh nonce
    pub fn login_params(&self) -> Result<LoginParams, Error> {
        let nonce = Self::generate_nonce();
        let signature = self.sign(&nonce)?;
        Ok(LoginParams {
            algo: "HS256",
            p_key: self.api_key.clone(),
            nonce,
            signature,
        })
    }

    /// Random alphanumeric nonce
    pub fn generate_nonce() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LEN)
            .map(char::from)
            .collect()
    }
}
