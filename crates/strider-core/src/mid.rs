//! Module identifiers (MIDs).
//!
//! A MID names one module instance: a type letter, a serial number and an
//! optional network address for instances living on another host.
//!
//! ```text
//! D7               downloader #7, local
//! A12|10.0.0.5:80  analyzer #12 reachable at 10.0.0.5:80
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::CrawlerError;
use crate::module::ModuleType;

const ADDR_SEPARATOR: char = '|';

/// The decoded components of a MID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidParts {
    pub module_type: ModuleType,
    pub serial: u64,
    pub addr: Option<SocketAddr>,
}

/// A validated module identifier.
///
/// Only obtainable through [`Mid::generate`] or parsing, so every value is
/// legal and round-trips through its textual form. Ordering, equality and
/// hashing follow the encoded string.
#[derive(Debug, Clone)]
pub struct Mid {
    encoded: String,
    parts: MidParts,
}

impl Mid {
    /// Builds the MID for the given type, serial number and optional address.
    pub fn generate(module_type: ModuleType, serial: u64, addr: Option<SocketAddr>) -> Self {
        let letter = module_type.letter();
        let encoded = match addr {
            Some(addr) => format!("{letter}{serial}{ADDR_SEPARATOR}{addr}"),
            None => format!("{letter}{serial}"),
        };
        Self {
            encoded,
            parts: MidParts {
                module_type,
                serial,
                addr,
            },
        }
    }

    /// Decodes and validates a MID string.
    pub fn parse(mid: &str) -> Result<Self, CrawlerError> {
        let parts = split_mid(mid)?;
        Ok(Self {
            encoded: mid.to_string(),
            parts,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn parts(&self) -> MidParts {
        self.parts
    }

    pub fn module_type(&self) -> ModuleType {
        self.parts.module_type
    }

    pub fn serial(&self) -> u64 {
        self.parts.serial
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.parts.addr
    }
}

/// Returns true if `mid` is a well-formed MID.
pub fn legal_mid(mid: &str) -> bool {
    split_mid(mid).is_ok()
}

fn split_mid(mid: &str) -> Result<MidParts, CrawlerError> {
    if mid.len() < 2 {
        return Err(CrawlerError::illegal_parameter(format!(
            "insufficient MID: {mid:?}"
        )));
    }
    let mut chars = mid.chars();
    let letter = chars.next().unwrap_or_default();
    let module_type = ModuleType::from_letter(letter).ok_or_else(|| {
        CrawlerError::illegal_parameter(format!("illegal module type letter: {letter}"))
    })?;
    let rest = chars.as_str();

    let (serial_str, addr_str) = match rest.rfind(ADDR_SEPARATOR) {
        Some(index) => (&rest[..index], Some(&rest[index + 1..])),
        None => (rest, None),
    };
    let serial = parse_unsigned::<u64>(serial_str).ok_or_else(|| {
        CrawlerError::illegal_parameter(format!("illegal module serial: {serial_str}"))
    })?;
    let addr = addr_str.map(parse_addr).transpose()?;

    Ok(MidParts {
        module_type,
        serial,
        addr,
    })
}

fn parse_addr(addr: &str) -> Result<SocketAddr, CrawlerError> {
    let index = match addr.rfind(':') {
        Some(index) if index > 0 => index,
        _ => {
            return Err(CrawlerError::illegal_parameter(format!(
                "illegal module address: {addr}"
            )));
        }
    };
    let (ip_str, port_str) = (&addr[..index], &addr[index + 1..]);
    let bare_ip = ip_str
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(ip_str);
    let ip = bare_ip
        .parse::<IpAddr>()
        .map_err(|_| CrawlerError::illegal_parameter(format!("illegal module IP: {ip_str}")))?;
    let port = parse_unsigned::<u16>(port_str).ok_or_else(|| {
        CrawlerError::illegal_parameter(format!("illegal module port: {port_str}"))
    })?;
    Ok(SocketAddr::new(ip, port))
}

/// Plain decimal digits only; `str::parse` would also accept a leading `+`.
fn parse_unsigned<T: FromStr>(s: &str) -> Option<T> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl FromStr for Mid {
    type Err = CrawlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mid::parse(s)
    }
}

impl fmt::Display for Mid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl PartialEq for Mid {
    fn eq(&self, other: &Self) -> bool {
        self.encoded == other.encoded
    }
}

impl Eq for Mid {}

impl Hash for Mid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.encoded.hash(state);
    }
}

impl PartialOrd for Mid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Mid {
    fn cmp(&self, other: &Self) -> Ordering {
        self.encoded.cmp(&other.encoded)
    }
}

impl Serialize for Mid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encoded)
    }
}
