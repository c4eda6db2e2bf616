//! Loading the master RSA keypair from disk.

use anyhow::{Context, Result};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::path::Path;

/// Loads a PEM encoded PKCS#1 RSA private key and returns the keypair.
pub fn load_keypair(path: &Path) -> Result<(RsaPublicKey, RsaPrivateKey)> {
    let pem = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read private key file {}", path.display()))?;

    let (public_key, private_key) = parse_keypair(&pem)
        .with_context(|| format!("failed to parse private key file {}", path.display()))?;

    Ok((public_key, private_key))
}

/// Parses a PEM encoded PKCS#1 RSA private key.
pub fn parse_keypair(pem: &str) -> Result<(RsaPublicKey, RsaPrivateKey)> {
    let private_key =
        RsaPrivateKey::from_pkcs1_pem(pem.trim()).context("failed to decode RSA private key PEM")?;
    let public_key = private_key.to_public_key();

    Ok((public_key, private_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ids;

    const TEST_KEY_PEM: &str = include_str!("../../testdata/rsa_key.pem");

    #[test]
    fn parses_test_key() {
        let (public_key, _private_key) = parse_keypair(TEST_KEY_PEM).unwrap();

        let permanent_id = ids::permanent_id(&public_key).unwrap();
        assert_eq!(
            permanent_id,
            [223, 98, 87, 241, 243, 157, 62, 37, 130, 70]
        );
        assert_eq!(ids::onion_address(&permanent_id), "35rfp4pttu7clasg");
    }

    #[test]
    fn rejects_non_key_input() {
        assert!(parse_keypair("not a key").is_err());
    }
}
