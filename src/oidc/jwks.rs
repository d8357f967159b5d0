use anyhow::{anyhow, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Jwk {
    pub kty: String,
    pub alg: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub kid: String,
    pub n: String,
    pub e: String,
}

impl Jwk {
    /// Signing JWK for `public_key`, identified by its RFC 7638 thumbprint.
    #[must_use]
    pub fn from_rsa_public_key(public_key: &RsaPublicKey) -> Self {
        let n = Base64UrlUnpadded::encode_string(&public_key.n().to_bytes_be());
        let e = Base64UrlUnpadded::encode_string(&public_key.e().to_bytes_be());
        let kid = thumbprint(&n, &e);
        Self {
            kty: "RSA".to_string(),
            alg: "RS256".to_string(),
            key_use: "sig".to_string(),
            kid,
            n,
            e,
        }
    }
}

/// RFC 7638 thumbprint: required members in lexicographic order, no whitespace.
fn thumbprint(n: &str, e: &str) -> String {
    let canonical = format!(r#"{{"e":"{e}","kty":"RSA","n":"{n}"}}"#);
    Base64UrlUnpadded::encode_string(&Sha256::digest(canonical.as_bytes()))
}

pub(super) fn decode_public_key(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|_| anyhow!("failed to parse RSA public key"))
}

pub(super) fn decode_private_key(pem: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|_| anyhow!("failed to parse RSA private key"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUBLIC_PEM: &str = include_str!("../../tests/fixtures/oidc-public.pem");
    const PRIVATE_PEM: &str = include_str!("../../tests/fixtures/oidc-private.pem");

    #[test]
    fn rfc7638_thumbprint_example() {
        // RFC 7638, section 3.1.
        let n = "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw";
        assert_eq!(thumbprint(n, "AQAB"), "NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn jwk_from_public_key() {
        let public_key = decode_public_key(PUBLIC_PEM).unwrap();
        let jwk = Jwk::from_rsa_public_key(&public_key);
        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.alg, "RS256");
        assert_eq!(jwk.e, "AQAB");
        assert_eq!(Base64UrlUnpadded::decode_vec(&jwk.n).unwrap().len(), 256);

        let json = serde_json::to_value(&jwk).unwrap();
        assert_eq!(json["use"], "sig");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn private_key_derives_same_public_key() {
        let private_key = decode_private_key(PRIVATE_PEM).unwrap();
        let public_key = decode_public_key(PUBLIC_PEM).unwrap();
        assert_eq!(RsaPublicKey::from(&private_key), public_key);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_public_key("not a key").is_err());
        assert!(decode_private_key(PUBLIC_PEM).is_err());
    }
}
