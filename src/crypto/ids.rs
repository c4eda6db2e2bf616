//! Deterministic v2 identifier derivation.
//!
//! A master service is identified by the 10-byte truncated SHA-1 of its DER
//! encoded RSA public key. The descriptor id rotates once per day and is
//! derived from that permanent id, the wall time and a replica byte, as laid
//! out in rend-spec-v2 section 1.3.

use anyhow::{Context, Result};
use data_encoding::BASE32;
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::RsaPublicKey;
use sha1::{Digest, Sha1};

/// Seconds a v2 descriptor id stays valid (one time period).
pub const DESCRIPTOR_ID_VALIDITY: i64 = 86400;

/// Length of a permanent service id in bytes.
pub const PERMANENT_ID_LEN: usize = 10;

/// Returns the permanent id for a service public key: the first 10 bytes of
/// the SHA-1 of its PKCS#1 DER encoding.
pub fn permanent_id(permanent_key: &RsaPublicKey) -> Result<[u8; PERMANENT_ID_LEN]> {
    let der = permanent_key
        .to_pkcs1_der()
        .context("failed to marshal public key to DER")?;

    let digest = Sha1::digest(der.as_bytes());
    let mut id = [0u8; PERMANENT_ID_LEN];
    id.copy_from_slice(&digest[..PERMANENT_ID_LEN]);

    Ok(id)
}

/// Returns the v2 onion address for a permanent id: 16 lowercase base32
/// characters.
pub fn onion_address(permanent_id: &[u8; PERMANENT_ID_LEN]) -> String {
    BASE32.encode(permanent_id).to_lowercase()
}

/// time-period = (current-time + permanent-id-byte * 86400 / 256) / 86400
///
/// "permanent-id-byte" is the first (unsigned) byte of the permanent id.
fn time_period(time: i64, deviation: u8, permanent_id: &[u8; PERMANENT_ID_LEN]) -> i64 {
    let permanent_id_byte = i64::from(permanent_id[0]);
    (time + permanent_id_byte * DESCRIPTOR_ID_VALIDITY / 256) / DESCRIPTOR_ID_VALIDITY
        + i64::from(deviation)
}

/// secret-id-part = H(time-period | descriptor-cookie | replica)
pub fn secret_id(
    permanent_id: &[u8; PERMANENT_ID_LEN],
    time: i64,
    descriptor_cookie: &str,
    replica: u8,
    deviation: u8,
) -> [u8; 20] {
    let period = time_period(time, deviation, permanent_id) as u32;

    let mut hasher = Sha1::new();
    hasher.update(period.to_be_bytes());
    if !descriptor_cookie.is_empty() {
        hasher.update(descriptor_cookie.as_bytes());
    }
    hasher.update([replica]);

    let digest = hasher.finalize();
    let mut secret = [0u8; 20];
    secret.copy_from_slice(digest.as_slice());
    secret
}

/// The secret-id-part in the form it appears in a descriptor: lowercase
/// base32 of the 20-byte digest.
pub fn secret_id_base32(
    permanent_id: &[u8; PERMANENT_ID_LEN],
    time: i64,
    descriptor_cookie: &str,
    replica: u8,
    deviation: u8,
) -> String {
    BASE32
        .encode(&secret_id(
            permanent_id,
            time,
            descriptor_cookie,
            replica,
            deviation,
        ))
        .to_lowercase()
}

/// Computes the v2 descriptor id: 32 uppercase base32 characters of
/// H(permanent-id | secret-id-part).
pub fn descriptor_id(
    permanent_id: &[u8; PERMANENT_ID_LEN],
    time: i64,
    replica: u8,
    deviation: u8,
    descriptor_cookie: &str,
) -> String {
    let secret = secret_id(permanent_id, time, descriptor_cookie, replica, deviation);

    let mut hasher = Sha1::new();
    hasher.update(permanent_id);
    hasher.update(secret);

    BASE32.encode(&hasher.finalize())
}

/// Seconds until the descriptor id derived from this permanent id changes.
/// Always in `1..=86400`.
pub fn seconds_until_change(permanent_id: &[u8; PERMANENT_ID_LEN], time: i64) -> i64 {
    let permanent_id_byte = i64::from(permanent_id[0]);
    DESCRIPTOR_ID_VALIDITY
        - ((time + permanent_id_byte * DESCRIPTOR_ID_VALIDITY / 256) % DESCRIPTOR_ID_VALIDITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    // facebookcorewwwi, base32 decoded
    const FACEBOOK_PERMANENT_ID: [u8; PERMANENT_ID_LEN] =
        [40, 4, 64, 185, 202, 19, 162, 75, 90, 200];

    #[test]
    fn descriptor_id_reference_vector() {
        let got = descriptor_id(&FACEBOOK_PERMANENT_ID, 1_435_229_421, 0, 0, "");
        assert_eq!(got, "J3ZUU5O2DY5OLOD2HY74OJP3SHG24LZP");
    }

    #[test]
    fn time_period_reference_vector() {
        assert_eq!(time_period(1_435_229_421, 0, &FACEBOOK_PERMANENT_ID), 16611);
    }

    #[test]
    fn secret_id_reference_vector() {
        let got = secret_id(&FACEBOOK_PERMANENT_ID, 1_435_229_421, "", 0, 0);
        assert_eq!(
            got,
            [
                160, 216, 228, 236, 154, 194, 138, 255, 237, 79, 168, 40, 232, 114, 124, 127, 212,
                171, 73, 48
            ]
        );
    }

    #[test]
    fn onion_address_is_16_lowercase_chars() {
        let address = onion_address(&[248, 166, 21, 165, 230, 82, 1, 128, 34, 96]);
        assert_eq!(address, "7ctbljpgkiayaita");
        assert_eq!(address.len(), 16);
        assert!(address.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn seconds_until_change_reference_vector() {
        // permanent id of the test RSA key, first byte 0xf8
        let permanent_id = [248, 166, 21, 165, 230, 82, 1, 128, 34, 96];
        assert_eq!(seconds_until_change(&permanent_id, 1_435_229_421), 50079);
    }

    #[test]
    fn seconds_until_change_is_bounded_and_periodic() {
        let time = 1_435_229_421;
        let remaining = seconds_until_change(&FACEBOOK_PERMANENT_ID, time);
        assert!((1..=DESCRIPTOR_ID_VALIDITY).contains(&remaining));
        assert_eq!(
            seconds_until_change(&FACEBOOK_PERMANENT_ID, time + remaining),
            DESCRIPTOR_ID_VALIDITY
        );
    }

    #[test]
    fn descriptor_id_differs_per_replica() {
        let a = descriptor_id(&FACEBOOK_PERMANENT_ID, 1_435_229_421, 0, 0, "");
        let b = descriptor_id(&FACEBOOK_PERMANENT_ID, 1_435_229_421, 1, 0, "");
        assert_ne!(a, b);
    }
}
