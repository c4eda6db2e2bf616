//! Router status entry codec.
//!
//! Parses the `ns/all` style router status listing: repeated multi-line
//! entries, each starting with an `r ` line, as defined in dir-spec.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::net::{IpAddr, Ipv4Addr};

use crate::descriptor::TIME_FORMAT;
use crate::util::base64_to_hex;

/// The flags a router status entry can carry on its `s` line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterFlags {
    pub authority: bool,
    pub bad_exit: bool,
    pub exit: bool,
    pub fast: bool,
    pub guard: bool,
    pub hsdir: bool,
    pub named: bool,
    pub stable: bool,
    pub running: bool,
    pub unnamed: bool,
    pub v2dir: bool,
    pub valid: bool,
}

/// One router status entry.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterStatusEntry {
    pub nickname: String,
    pub fingerprint: String,
    pub digest: String,
    pub published: DateTime<Utc>,
    pub address: IpAddr,
    pub or_port: u16,
    pub dir_port: u16,
    pub flags: RouterFlags,
    pub version: String,
    pub bandwidth: u64,
    pub accept: bool,
    pub port_list: String,
}

impl Default for RouterStatusEntry {
    fn default() -> Self {
        Self {
            nickname: String::new(),
            fingerprint: String::new(),
            digest: String::new(),
            published: DateTime::UNIX_EPOCH,
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            or_port: 0,
            dir_port: 0,
            flags: RouterFlags::default(),
            version: String::new(),
            bandwidth: 0,
            accept: false,
            port_list: String::new(),
        }
    }
}

/// Parses a router status listing into its entries.
pub fn parse_router_status_entries(data: &str) -> Result<Vec<RouterStatusEntry>> {
    let mut entries = Vec::new();
    let mut rest = data;

    while !rest.is_empty() {
        let start = if rest.starts_with("r ") {
            0
        } else {
            match rest.find("\nr ") {
                Some(pos) => pos + 1,
                None => {
                    if entries.is_empty() {
                        bail!("cannot find the start of a router status entry");
                    }
                    break;
                }
            }
        };

        match rest[start..].find("\nr ") {
            Some(end) => {
                entries.push(parse_router_status_entry(&rest[start..start + end + 1])?);
                rest = &rest[start + end + 1..];
            }
            None => {
                entries.push(parse_router_status_entry(&rest[start..])?);
                break;
            }
        }
    }

    Ok(entries)
}

/// Parses one router status entry from its lines.
pub fn parse_router_status_entry(entry_raw: &str) -> Result<RouterStatusEntry> {
    let mut entry = RouterStatusEntry::default();

    for line in entry_raw.split('\n') {
        let words: Vec<&str> = line.split(' ').collect();
        match words.first().copied().unwrap_or("") {
            // r SP nickname SP identity SP digest SP publication SP IP SP ORPort SP DirPort NL
            "r" => {
                if words.len() < 9 {
                    bail!("malformed r line {line:?}");
                }

                entry.nickname = words[1].to_string();
                entry.fingerprint = base64_to_hex(words[2])?;
                entry.digest = base64_to_hex(words[3])?;
                entry.published = NaiveDateTime::parse_from_str(
                    &format!("{} {}", words[4], words[5]),
                    TIME_FORMAT,
                )
                .with_context(|| format!("invalid publication time in r line {line:?}"))?
                .and_utc();
                entry.address = words[6]
                    .parse()
                    .with_context(|| format!("invalid address in r line {line:?}"))?;
                entry.or_port = words[7]
                    .parse()
                    .with_context(|| format!("invalid OR port in r line {line:?}"))?;
                entry.dir_port = words[8]
                    .parse()
                    .with_context(|| format!("invalid dir port in r line {line:?}"))?;
            }
            "s" => entry.flags = parse_flags(&words[1..]),
            "v" => {
                if let Some(version) = words.get(2) {
                    entry.version = (*version).to_string();
                }
            }
            "w" => {
                let value = words
                    .get(1)
                    .and_then(|w| w.split('=').nth(1))
                    .with_context(|| format!("malformed w line {line:?}"))?;
                entry.bandwidth = value
                    .parse()
                    .with_context(|| format!("invalid bandwidth in w line {line:?}"))?;
            }
            "p" => {
                entry.accept = words.get(1).copied() == Some("accept");
                entry.port_list = words.get(2..).unwrap_or(&[]).join(" ");
            }
            _ => {}
        }
    }

    Ok(entry)
}

fn parse_flags(flags: &[&str]) -> RouterFlags {
    let mut parsed = RouterFlags::default();
    for flag in flags {
        match *flag {
            "Authority" => parsed.authority = true,
            "BadExit" => parsed.bad_exit = true,
            "Exit" => parsed.exit = true,
            "Fast" => parsed.fast = true,
            "Guard" => parsed.guard = true,
            "HSDir" => parsed.hsdir = true,
            "Named" => parsed.named = true,
            "Stable" => parsed.stable = true,
            "Running" => parsed.running = true,
            "Unnamed" => parsed.unnamed = true,
            "V2Dir" => parsed.v2dir = true,
            "Valid" => parsed.valid = true,
            _ => {}
        }
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seele() -> RouterStatusEntry {
        RouterStatusEntry {
            nickname: "seele".to_string(),
            fingerprint: "000A10D43011EA4928A35F610405F92B4433B4DC".to_string(),
            digest: "40DA496B6764B5D9FC4AF368DF4BFFD81EACE4AA".to_string(),
            published: NaiveDateTime::parse_from_str("2018-08-03 07:40:21", TIME_FORMAT)
                .unwrap()
                .and_utc(),
            address: "67.161.31.147".parse().unwrap(),
            or_port: 9001,
            dir_port: 0,
            flags: RouterFlags {
                fast: true,
                hsdir: true,
                running: true,
                stable: true,
                v2dir: true,
                valid: true,
                ..RouterFlags::default()
            },
            bandwidth: 27,
            ..RouterStatusEntry::default()
        }
    }

    #[test]
    fn parses_single_entry() {
        let entry = "r seele AAoQ1DAR6kkoo19hBAX5K0QztNw QNpJa2dktdn8SvNo30v/2B6s5Ko 2018-08-03 07:40:21 67.161.31.147 9001 0\n\
                     s Fast HSDir Running Stable V2Dir Valid\nw Bandwidth=27";
        let got = parse_router_status_entry(entry).unwrap();
        assert_eq!(got, seele());
    }

    #[test]
    fn parses_multiple_entries_with_leading_junk() {
        let input = "\nr seele AAoQ1DAR6kkoo19hBAX5K0QztNw QNpJa2dktdn8SvNo30v/2B6s5Ko 2018-08-03 07:40:21 67.161.31.147 9001 0\n\
s Fast HSDir Running Stable V2Dir Valid\n\
w Bandwidth=27\n\
r PutoElQueLee293884 AAwffNL+oHO5EdyUoWAOwvEX3ws 5QplY/hILpnKQmaLY2a0XDQqWPc 2018-08-03 01:31:37 174.127.217.73 55554 0\n\
s Fast HSDir Running Stable V2Dir Valid\n\
w Bandwidth=7470\n\
r CalyxInstitute14 ABG9JIWtRdmE7EFZyI/AZuXjMA4 eWJZzoxXGAIKVXpxz1CVX3Fmvm8 2018-08-02 23:07:12 162.247.74.201 443 80\n\
s Exit Fast Guard HSDir Running Stable V2Dir Valid\n\
w Bandwidth=15800\n\
r UbuntuCore239 ACsCTiSjDxE5gvyxff4FtvOMDHk ZPuLd7UfaBkIzBno5zkv6tFeVm0 2018-08-03 08:10:55 95.236.11.166 40889 0\n\
s Fast Running V2Dir Valid\n\
w Bandwidth=14";

        let entries = parse_router_status_entries(input).unwrap();
        assert_eq!(entries.len(), 4);

        assert_eq!(entries[0], seele());

        assert_eq!(entries[1].nickname, "PutoElQueLee293884");
        assert_eq!(
            entries[1].fingerprint,
            "000C1F7CD2FEA073B911DC94A1600EC2F117DF0B"
        );
        assert_eq!(
            entries[1].digest,
            "E50A6563F8482E99CA42668B6366B45C342A58F7"
        );
        assert_eq!(entries[1].or_port, 55554);
        assert_eq!(entries[1].bandwidth, 7470);

        assert_eq!(entries[2].nickname, "CalyxInstitute14");
        assert_eq!(
            entries[2].fingerprint,
            "0011BD2485AD45D984EC4159C88FC066E5E3300E"
        );
        assert!(entries[2].flags.exit);
        assert!(entries[2].flags.guard);
        assert_eq!(entries[2].dir_port, 80);

        assert_eq!(entries[3].nickname, "UbuntuCore239");
        assert_eq!(
            entries[3].fingerprint,
            "002B024E24A30F113982FCB17DFE05B6F38C0C79"
        );
        assert!(!entries[3].flags.hsdir);
        assert_eq!(entries[3].bandwidth, 14);
    }

    #[test]
    fn parses_version_and_policy_lines() {
        let entry = "r seele AAoQ1DAR6kkoo19hBAX5K0QztNw QNpJa2dktdn8SvNo30v/2B6s5Ko 2018-08-03 07:40:21 67.161.31.147 9001 0\n\
                     s Fast HSDir Running Stable V2Dir Valid\n\
                     v Tor 0.3.3.7\n\
                     w Bandwidth=27\n\
                     p reject 1-65535";
        let got = parse_router_status_entry(entry).unwrap();
        assert_eq!(got.version, "0.3.3.7");
        assert!(!got.accept);
        assert_eq!(got.port_list, "1-65535");
    }

    #[test]
    fn parses_flag_words() {
        let got = parse_flags(&["Fast", "HSDir", "Running", "Stable", "V2Dir", "Valid"]);
        let want = RouterFlags {
            fast: true,
            hsdir: true,
            running: true,
            stable: true,
            v2dir: true,
            valid: true,
            ..RouterFlags::default()
        };
        assert_eq!(got, want);
    }

    #[test]
    fn rejects_input_without_entries() {
        assert!(parse_router_status_entries("no router lines here").is_err());
    }

    #[test]
    fn rejects_short_r_line() {
        assert!(parse_router_status_entry("r seele only three").is_err());
    }
}
