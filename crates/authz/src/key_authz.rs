//! Key authorizations (RFC 8555 §8.1)
//!
//! A key authorization binds a challenge token to the account key:
//! `token || "." || base64url(JWK thumbprint)`. The authority recomputes it
//! independently, so any divergence here fails validation silently.

use sha2::{Digest, Sha256};

use crate::error::KeyError;
use crate::jose::{b64, PublicKey};

/// Build the key authorization for `token`
pub fn build_key_authorization(token: &str, public_key: &PublicKey) -> Result<String, KeyError> {
    if token.is_empty() {
        return Err(KeyError::Malformed("challenge token is empty".to_string()));
    }
    let thumbprint = public_key.thumbprint()?;
    Ok(format!("{}.{}", token, thumbprint))
}

/// Token half of a key authorization
pub fn token_of(key_authorization: &str) -> Option<&str> {
    key_authorization
        .split_once('.')
        .map(|(token, _)| token)
        .filter(|token| !token.is_empty())
}

/// TXT record value for a DNS-01 challenge: base64url(SHA-256(key authorization))
pub fn dns01_txt_value(key_authorization: &str) -> String {
    b64(Sha256::digest(key_authorization.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jose::AccountKey;
    use proptest::prelude::*;

    fn rsa_key() -> PublicKey {
        PublicKey::Rsa {
            n: "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw".to_string(),
            e: "AQAB".to_string(),
        }
    }

    #[test]
    fn test_known_key_authorization() {
        let ka = build_key_authorization("abc123", &rsa_key()).unwrap();
        assert_eq!(ka, "abc123.NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs");
        assert_eq!(token_of(&ka), Some("abc123"));
    }

    #[test]
    fn test_dns01_value_shape() {
        let value = dns01_txt_value("abc123.NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs");
        // 32-byte digest -> 43 base64url characters, no padding
        assert_eq!(value.len(), 43);
        assert!(!value.contains('='));
        assert!(!value.contains('+') && !value.contains('/'));
    }

    #[test]
    fn test_empty_token_is_rejected() {
        assert!(build_key_authorization("", &rsa_key()).is_err());
        assert_eq!(token_of(".thumb"), None);
        assert_eq!(token_of("no-dot"), None);
    }

    #[test]
    fn test_distinct_keys_give_distinct_authorizations() {
        let a = AccountKey::generate().unwrap();
        let b = AccountKey::generate().unwrap();
        assert_ne!(
            build_key_authorization("tok", a.public_key()).unwrap(),
            build_key_authorization("tok", b.public_key()).unwrap()
        );
    }

    proptest! {
        #[test]
        fn prop_key_authorization_is_deterministic(token in "[A-Za-z0-9_-]{1,64}") {
            let key = rsa_key();
            let first = build_key_authorization(&token, &key).unwrap();
            let second = build_key_authorization(&token, &key).unwrap();
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(dns01_txt_value(&first), dns01_txt_value(&second));
            let prefix = format!("{}.", token);
            prop_assert!(first.starts_with(&prefix));
        }

        #[test]
        fn prop_different_tokens_differ(a in "[A-Za-z0-9_-]{1,32}", b in "[A-Za-z0-9_-]{1,32}") {
            prop_assume!(a != b);
            let key = rsa_key();
            prop_assert_ne!(
                build_key_authorization(&a, &key).unwrap(),
                build_key_authorization(&b, &key).unwrap()
            );
        }
    }
}
