//! v2 rendezvous service descriptor codec.
//!
//! Parses and generates the textual descriptor format defined in
//! rend-spec-v2: a line-oriented outer document carrying a PEM armored
//! public key, a PEM armored introduction point message and a PKCS#1 v1.5
//! signature over everything up to and including the `signature` line.

pub mod rotation;
pub mod router_status;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, NaiveDateTime, Utc};
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use std::net::{IpAddr, Ipv4Addr};

use crate::crypto::ids;

/// Timestamp layout used throughout the descriptor grammar.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const END_RSA_PUBLIC_KEY: &str = "-----END RSA PUBLIC KEY-----";
const END_MESSAGE: &str = "-----END MESSAGE-----";
const END_SIGNATURE: &str = "-----END SIGNATURE-----";

/// A v2 hidden service descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct HiddenServiceDescriptor {
    pub descriptor_id: String,
    pub version: u32,
    pub permanent_key: String,
    pub secret_id: String,
    pub published: DateTime<Utc>,
    pub protocol_versions: Vec<u32>,
    pub introduction_points_raw: String,
    pub introduction_points: Vec<IntroductionPoint>,
    pub signature: String,
}

impl Default for HiddenServiceDescriptor {
    fn default() -> Self {
        Self {
            descriptor_id: String::new(),
            version: 0,
            permanent_key: String::new(),
            secret_id: String::new(),
            published: DateTime::UNIX_EPOCH,
            protocol_versions: Vec::new(),
            introduction_points_raw: String::new(),
            introduction_points: Vec::new(),
            signature: String::new(),
        }
    }
}

/// A single introduction point advertised in a descriptor.
///
/// `raw` preserves the original textual representation byte for byte so the
/// point can be re-emitted into a new descriptor without re-encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct IntroductionPoint {
    pub identifier: String,
    pub address: IpAddr,
    pub port: u16,
    pub onion_key: String,
    pub service_key: String,
    pub raw: String,
}

impl Default for IntroductionPoint {
    fn default() -> Self {
        Self {
            identifier: String::new(),
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            onion_key: String::new(),
            service_key: String::new(),
            raw: String::new(),
        }
    }
}

/// Parses a v2 hidden service descriptor from its textual form.
pub fn parse_descriptor(descriptor_raw: &str) -> Result<HiddenServiceDescriptor> {
    let mut descriptor = HiddenServiceDescriptor::default();
    let lines: Vec<&str> = descriptor_raw.split('\n').collect();

    for (i, line) in lines.iter().enumerate() {
        let mut words = line.split(' ');
        match words.next().unwrap_or("") {
            "rendezvous-service-descriptor" => {
                descriptor.descriptor_id = words
                    .next()
                    .context("rendezvous-service-descriptor line is missing its id")?
                    .to_string();
            }
            "version" => {
                descriptor.version = words
                    .next()
                    .context("version line is missing its value")?
                    .parse()
                    .context("version is not an integer")?;
            }
            "permanent-key" => {
                descriptor.permanent_key = extract_entry(END_RSA_PUBLIC_KEY, &lines[i..])?;
            }
            "secret-id-part" => {
                descriptor.secret_id = words
                    .next()
                    .context("secret-id-part line is missing its id")?
                    .to_string();
            }
            "publication-time" => {
                let value = line
                    .strip_prefix("publication-time ")
                    .context("publication-time line is missing its value")?;
                descriptor.published = NaiveDateTime::parse_from_str(value, TIME_FORMAT)
                    .with_context(|| format!("invalid publication time {value:?}"))?
                    .and_utc();
            }
            "protocol-versions" => {
                let csv = words
                    .next()
                    .context("protocol-versions line is missing its value")?;
                for version in csv.split(',') {
                    descriptor.protocol_versions.push(
                        version
                            .parse()
                            .with_context(|| format!("invalid protocol version {version:?}"))?,
                    );
                }
            }
            "introduction-points" => {
                descriptor.introduction_points_raw = extract_entry(END_MESSAGE, &lines[i..])?;
                descriptor.introduction_points =
                    parse_introduction_points(&descriptor.introduction_points_raw)?;
            }
            "signature" => {
                descriptor.signature = extract_entry(END_SIGNATURE, &lines[i..])?;
            }
            _ => {}
        }
    }

    Ok(descriptor)
}

/// Parses the armored introduction points block of a descriptor.
pub fn parse_introduction_points(data: &str) -> Result<Vec<IntroductionPoint>> {
    let payload = dearmor("MESSAGE", data)?;
    let text =
        String::from_utf8(payload).context("introduction points block is not valid UTF-8")?;

    let mut points = Vec::new();
    let mut rest = text.as_str();

    while !rest.is_empty() {
        let start = if rest.starts_with("introduction-point") {
            0
        } else {
            rest.find("introduction-point")
                .context("cannot find any introduction points")?
        };

        match rest[start..].find("\nintroduction-point ") {
            Some(end) => {
                points.push(parse_introduction_point(&rest[start..start + end + 1])?);
                rest = &rest[start + end + 1..];
            }
            None => {
                points.push(parse_introduction_point(&rest[start..])?);
                break;
            }
        }
    }

    Ok(points)
}

/// Parses one introduction point block. The block text is preserved in the
/// returned point's `raw` field.
fn parse_introduction_point(data: &str) -> Result<IntroductionPoint> {
    let mut point = IntroductionPoint::default();
    let lines: Vec<&str> = data.split('\n').collect();

    for (i, line) in lines.iter().enumerate() {
        let mut words = line.split(' ');
        match words.next().unwrap_or("") {
            "introduction-point" => {
                point.identifier = words
                    .next()
                    .context("introduction-point line is missing its identifier")?
                    .to_string();
            }
            "ip-address" => {
                let value = words
                    .next()
                    .context("ip-address line is missing its value")?;
                point.address = value
                    .parse()
                    .with_context(|| format!("invalid introduction point address {value:?}"))?;
            }
            "onion-port" => {
                let value = words
                    .next()
                    .context("onion-port line is missing its value")?;
                point.port = value
                    .parse()
                    .with_context(|| format!("invalid introduction point port {value:?}"))?;
            }
            "onion-key" => {
                point.onion_key = extract_entry(END_RSA_PUBLIC_KEY, &lines[i..])?;
            }
            "service-key" => {
                point.service_key = extract_entry(END_RSA_PUBLIC_KEY, &lines[i..])?;
            }
            _ => {}
        }
    }

    if point.identifier.is_empty() {
        bail!("introduction point block is missing its identifier");
    }

    point.raw = data.to_string();

    Ok(point)
}

/// Collects the lines following a tag line up to and including the line
/// containing `end`.
fn extract_entry(end: &str, lines: &[&str]) -> Result<String> {
    let mut entry = String::new();
    for line in &lines[1..] {
        entry.push_str(line);
        entry.push('\n');

        if line.contains(end) {
            break;
        }
    }

    if entry.is_empty() {
        bail!("could not find entry terminated by {end:?}");
    }

    Ok(entry)
}

/// Generates a signed v2 hidden service descriptor.
///
/// `permanent_id` and `descriptor_id` may be supplied when the caller has
/// already computed them, otherwise they are derived from the key and time.
#[allow(clippy::too_many_arguments)]
pub fn generate_descriptor(
    introduction_points: &[IntroductionPoint],
    published: i64,
    replica: u8,
    deviation: u8,
    descriptor_cookie: &str,
    permanent_key: &RsaPublicKey,
    private_key: &RsaPrivateKey,
    permanent_id: Option<[u8; ids::PERMANENT_ID_LEN]>,
    descriptor_id: Option<String>,
) -> Result<String> {
    let permanent_id = match permanent_id {
        Some(id) => id,
        None => ids::permanent_id(permanent_key).context("failed to calculate permanent id")?,
    };

    let descriptor_id = match descriptor_id {
        Some(id) => id,
        None => ids::descriptor_id(&permanent_id, published, replica, deviation, descriptor_cookie),
    };

    let der = permanent_key
        .to_pkcs1_der()
        .context("failed to marshal permanent key")?;
    let permanent_key_block = armor("RSA PUBLIC KEY", der.as_bytes());

    let secret_id = ids::secret_id_base32(
        &permanent_id,
        published,
        descriptor_cookie,
        replica,
        deviation,
    );

    let intro_block = introduction_points_block(introduction_points);

    // publication time is truncated down to the hour
    let truncated = published - published.rem_euclid(3600);
    let formatted = DateTime::<Utc>::from_timestamp(truncated, 0)
        .context("publication time out of range")?
        .format(TIME_FORMAT);

    let mut text = String::new();
    text.push_str("rendezvous-service-descriptor ");
    text.push_str(&descriptor_id.to_lowercase());
    text.push_str("\nversion 2\npermanent-key\n");
    text.push_str(&permanent_key_block);
    text.push_str("secret-id-part ");
    text.push_str(&secret_id);
    text.push('\n');
    text.push_str(&format!("publication-time {formatted}\n"));
    text.push_str("protocol-versions 2,3\n");
    text.push_str("introduction-points\n");
    text.push_str(&intro_block);
    text.push_str("signature\n");

    let digest = Sha1::digest(text.as_bytes());
    let signature = private_key
        .sign(Pkcs1v15Sign::new_unprefixed(), digest.as_slice())
        .context("failed to sign descriptor")?;
    text.push_str(&armor("SIGNATURE", &signature));

    Ok(text)
}

/// Concatenates the raw form of each introduction point and wraps the result
/// in a PEM MESSAGE armor, preserving order.
pub fn introduction_points_block(introduction_points: &[IntroductionPoint]) -> String {
    let mut payload = Vec::new();
    for point in introduction_points {
        payload.extend_from_slice(point.raw.as_bytes());
    }

    armor("MESSAGE", &payload)
}

/// Wraps bytes in a PEM armor with the base64 body broken at 64 columns.
pub fn armor(label: &str, payload: &[u8]) -> String {
    let encoded = STANDARD.encode(payload);

    let mut block = format!("-----BEGIN {label}-----\n");
    let mut rest = encoded.as_str();
    while !rest.is_empty() {
        let (chunk, tail) = rest.split_at(rest.len().min(64));
        block.push_str(chunk);
        block.push('\n');
        rest = tail;
    }
    block.push_str(&format!("-----END {label}-----\n"));

    block
}

/// Decodes a PEM armored block. The armor must span the entire input;
/// trailing bytes after the end line are an error.
pub fn dearmor(label: &str, data: &str) -> Result<Vec<u8>> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");

    let mut lines = data.lines();
    let first = lines.next().unwrap_or("");
    if first != begin {
        bail!("expected {begin:?}, found {first:?}");
    }

    let mut body = String::new();
    let mut terminated = false;
    for line in &mut lines {
        if line == end {
            terminated = true;
            break;
        }
        body.push_str(line.trim());
    }

    if !terminated {
        bail!("missing {end:?}");
    }

    if lines.any(|line| !line.trim().is_empty()) {
        bail!("trailing bytes after {end:?}");
    }

    STANDARD
        .decode(body.as_bytes())
        .with_context(|| format!("invalid base64 in {label} block"))
}
