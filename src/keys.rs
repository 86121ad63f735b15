//! The tool's own RSA key pair.
//!
//! Loaded once at startup and read-only afterwards. The public half is
//! published through the JWKS endpoint; the private half signs client
//! assertions. Loading refuses a pair whose halves do not match.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::types::{ClientId, KeyId};

/// A public RSA signing key in JWK form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicJwk {
    pub kid: String,
    pub alg: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub kty: String,
    pub n: String,
    pub e: String,
}

/// JWKS document as served to the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<PublicJwk>,
}

/// Who we claim to be in the assertions we sign.
#[derive(Debug, Clone)]
pub struct SigningIdentity {
    /// `iss` of outbound assertions.
    pub issuer: String,
    /// `sub` of outbound assertions.
    pub client_id: ClientId,
}

/// Process-wide signing key and its published counterpart.
pub struct KeyMaterial {
    key_id: KeyId,
    identity: SigningIdentity,
    encoding_key: EncodingKey,
    jwk: PublicJwk,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key_id", &self.key_id)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl KeyMaterial {
    /// Read and parse the key pair from PEM files.
    pub fn load(
        private_key_path: &Path,
        public_key_path: &Path,
        key_id: KeyId,
        identity: SigningIdentity,
    ) -> Result<Self, KeyError> {
        let private_pem = read_pem(private_key_path)?;
        let public_pem = read_pem(public_key_path)?;
        Self::from_pem(&private_pem, &public_pem, key_id, identity)
    }

    /// Parse the key pair from PEM text.
    ///
    /// Accepts PKCS#8 or PKCS#1 private keys and SPKI or PKCS#1 public keys.
    pub fn from_pem(
        private_pem: &str,
        public_pem: &str,
        key_id: KeyId,
        identity: SigningIdentity,
    ) -> Result<Self, KeyError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_pem))
            .map_err(|e| KeyError::Parse {
                what: "private key",
                message: e.to_string(),
            })?;

        let public_key = RsaPublicKey::from_public_key_pem(public_pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(public_pem))
            .map_err(|e| KeyError::Parse {
                what: "public key",
                message: e.to_string(),
            })?;

        let derived = RsaPublicKey::from(&private_key);
        if derived.n() != public_key.n() || derived.e() != public_key.e() {
            return Err(KeyError::Mismatch);
        }

        let encoding_key =
            EncodingKey::from_rsa_pem(private_pem.as_bytes()).map_err(|e| KeyError::Parse {
                what: "signing key",
                message: e.to_string(),
            })?;

        let jwk = PublicJwk {
            kid: key_id.as_str().to_string(),
            alg: "RS256".to_string(),
            key_use: "sig".to_string(),
            kty: "RSA".to_string(),
            n: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        };

        Ok(Self {
            key_id,
            identity,
            encoding_key,
            jwk,
        })
    }

    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    /// The public key as a JWK, for JWKS publication.
    pub fn public_jwk(&self) -> PublicJwk {
        self.jwk.clone()
    }

    /// A JWKS document containing only our key.
    pub fn jwk_set(&self) -> JwkSet {
        JwkSet {
            keys: vec![self.public_jwk()],
        }
    }

    /// Sign an RS256 assertion for `audience`, valid for `ttl`.
    ///
    /// `iss`, `sub`, `aud`, `iat`, `exp` and a fresh `jti` are always set by
    /// this method and override same-named entries in `claims`.
    pub fn sign(
        &self,
        audience: &str,
        mut claims: Map<String, Value>,
        ttl: Duration,
    ) -> Result<String, KeyError> {
        let ttl_secs = i64::try_from(ttl.as_secs()).map_err(|_| KeyError::InvalidTtl)?;
        if ttl_secs < 1 {
            return Err(KeyError::InvalidTtl);
        }

        let issued_at = chrono::Utc::now().timestamp();
        claims.insert("iss".into(), Value::from(self.identity.issuer.clone()));
        claims.insert(
            "sub".into(),
            Value::from(self.identity.client_id.as_str().to_string()),
        );
        claims.insert("aud".into(), Value::from(audience.to_string()));
        claims.insert("iat".into(), Value::from(issued_at));
        claims.insert("exp".into(), Value::from(issued_at + ttl_secs));
        claims.insert("jti".into(), Value::from(Uuid::new_v4().to_string()));

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.key_id.as_str().to_string());

        encode(&header, &claims, &self.encoding_key).map_err(|e| KeyError::Sign(e.to_string()))
    }
}

fn read_pem(path: &Path) -> Result<String, KeyError> {
    std::fs::read_to_string(path).map_err(|e| KeyError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Errors loading or using the key pair.
#[derive(Debug, Clone)]
pub enum KeyError {
    /// A key file could not be read.
    Read { path: String, message: String },
    /// A key could not be parsed.
    Parse { what: &'static str, message: String },
    /// The configured public key is not the private key's counterpart.
    Mismatch,
    /// Assertion lifetime must be at least one second.
    InvalidTtl,
    /// Signing failed.
    Sign(String),
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, message } => {
                write!(f, "Failed to read key file {}: {}", path, message)
            }
            Self::Parse { what, message } => write!(f, "Failed to parse {}: {}", what, message),
            Self::Mismatch => write!(f, "Public key does not match private key"),
            Self::InvalidTtl => write!(f, "Assertion lifetime must be at least one second"),
            Self::Sign(msg) => write!(f, "Failed to sign assertion: {}", msg),
        }
    }
}

impl std::error::Error for KeyError {}
