//! Account keys and JSON Web Signatures (RFC 7515, RFC 7638)
//!
//! Account keys are ECDSA P-256 and sign with `ES256`. Public keys are
//! modelled as JWKs so that thumbprints can also be computed for RSA keys
//! handed in from elsewhere.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::KeyError;

/// PEM tag of a PKCS#8 private key
const PKCS8_PEM_TAG: &str = "PRIVATE KEY";

/// JWS algorithm used for every request
pub const ALGORITHM: &str = "ES256";

pub(crate) fn b64(data: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

// ============================================================================
// Public keys
// ============================================================================

/// Public JSON Web Key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum PublicKey {
    #[serde(rename = "EC")]
    Ec { crv: String, x: String, y: String },
    #[serde(rename = "RSA")]
    Rsa { n: String, e: String },
}

// Thumbprint members in lexicographic order, required members only
#[derive(Serialize)]
struct EcThumbprint<'a> {
    crv: &'a str,
    kty: &'static str,
    x: &'a str,
    y: &'a str,
}

#[derive(Serialize)]
struct RsaThumbprint<'a> {
    e: &'a str,
    kty: &'static str,
    n: &'a str,
}

impl PublicKey {
    /// JWK for an uncompressed P-256 point (`0x04 || X || Y`)
    pub fn from_p256_point(point: &[u8]) -> Result<Self, KeyError> {
        if point.len() != 65 || point[0] != 0x04 {
            return Err(KeyError::Malformed(format!(
                "expected a 65-byte uncompressed P-256 point, got {} bytes",
                point.len()
            )));
        }
        Ok(PublicKey::Ec {
            crv: "P-256".to_string(),
            x: b64(&point[1..33]),
            y: b64(&point[33..65]),
        })
    }

    /// RFC 7638 thumbprint: base64url(SHA-256(canonical JWK))
    pub fn thumbprint(&self) -> Result<String, KeyError> {
        let canonical = match self {
            PublicKey::Ec { crv, x, y } => {
                if !matches!(crv.as_str(), "P-256" | "P-384" | "P-521") {
                    return Err(KeyError::Unsupported(format!("EC curve '{}'", crv)));
                }
                check_member("x", x)?;
                check_member("y", y)?;
                serde_json::to_vec(&EcThumbprint { crv, kty: "EC", x, y })
            }
            PublicKey::Rsa { n, e } => {
                check_member("n", n)?;
                check_member("e", e)?;
                serde_json::to_vec(&RsaThumbprint { e, kty: "RSA", n })
            }
        }
        .map_err(|e| KeyError::Malformed(e.to_string()))?;

        Ok(b64(Sha256::digest(&canonical)))
    }
}

fn check_member(name: &str, value: &str) -> Result<(), KeyError> {
    if value.is_empty() {
        return Err(KeyError::Malformed(format!("JWK member '{}' is empty", name)));
    }
    URL_SAFE_NO_PAD
        .decode(value)
        .map(|_| ())
        .map_err(|e| KeyError::Malformed(format!("JWK member '{}': {}", name, e)))
}

// ============================================================================
// Account key
// ============================================================================

/// ECDSA P-256 account key pair
pub struct AccountKey {
    pair: EcdsaKeyPair,
    pkcs8: Vec<u8>,
    public: PublicKey,
    rng: SystemRandom,
}

impl std::fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountKey")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

impl AccountKey {
    /// Generate a fresh key pair
    pub fn generate() -> Result<Self, KeyError> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|_| KeyError::Generation)?;
        Self::from_pkcs8_der(pkcs8.as_ref())
    }

    /// Load from PKCS#8 DER
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, KeyError> {
        let rng = SystemRandom::new();
        let pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, der, &rng)
            .map_err(|e| KeyError::Malformed(e.to_string()))?;
        let public = PublicKey::from_p256_point(pair.public_key().as_ref())?;

        Ok(Self {
            pair,
            pkcs8: der.to_vec(),
            public,
            rng,
        })
    }

    /// Load from a PKCS#8 PEM document
    pub fn from_pkcs8_pem(text: &str) -> Result<Self, KeyError> {
        let doc = pem::parse(text).map_err(|e| KeyError::Malformed(e.to_string()))?;
        if doc.tag() != PKCS8_PEM_TAG {
            return Err(KeyError::Unsupported(format!("PEM block '{}'", doc.tag())));
        }
        Self::from_pkcs8_der(doc.contents())
    }

    /// Encode as a PKCS#8 PEM document
    pub fn to_pkcs8_pem(&self) -> String {
        pem::encode(&pem::Pem::new(PKCS8_PEM_TAG, self.pkcs8.clone()))
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn algorithm(&self) -> &'static str {
        ALGORITHM
    }

    /// Fixed-length `r || s` signature over `message`
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, KeyError> {
        self.pair
            .sign(&self.rng, message)
            .map(|sig| sig.as_ref().to_vec())
            .map_err(|_| KeyError::Signing)
    }
}

// ============================================================================
// JWS
// ============================================================================

/// How the signer identifies itself in the protected header
#[derive(Debug, Clone, Copy)]
pub enum Signer<'a> {
    /// Embedded public key, only for account creation
    Jwk,
    /// Account URL
    Kid(&'a str),
}

#[derive(Serialize)]
struct ProtectedHeader<'a> {
    alg: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<&'a PublicKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
    nonce: &'a str,
    url: &'a str,
}

/// Flattened JWS JSON serialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jws {
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

impl Jws {
    /// Sign `payload` for `url`; an empty payload is a POST-as-GET
    pub fn sign(
        key: &AccountKey,
        signer: Signer<'_>,
        nonce: &str,
        url: &str,
        payload: &[u8],
    ) -> Result<Self, KeyError> {
        let (jwk, kid) = match signer {
            Signer::Jwk => (Some(key.public_key()), None),
            Signer::Kid(kid) => (None, Some(kid)),
        };
        let header = ProtectedHeader {
            alg: key.algorithm(),
            jwk,
            kid,
            nonce,
            url,
        };
        let protected =
            b64(serde_json::to_vec(&header).map_err(|e| KeyError::Malformed(e.to_string()))?);
        let payload = b64(payload);
        let signature = b64(key.sign(format!("{}.{}", protected, payload).as_bytes())?);

        Ok(Self {
            protected,
            payload,
            signature,
        })
    }
}
