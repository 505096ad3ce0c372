//! Content identifiers.
//!
//! A `Cid` names an immutable object in the storage network. Two string
//! forms are accepted:
//!
//! - CIDv0: a bare base58btc sha2-256 multihash, always 46 characters
//!   long and starting with `Qm`.
//! - CIDv1: a multibase string over `version || codec || multihash`,
//!   where the first three parts are unsigned varints.
//!
//! `Cid` keeps the binary form only; the string form is recomputed on
//! display (base58btc for v0, base32-lower for v1).

use bytes::Bytes;
use std::{fmt, str::FromStr};

const CIDV0_STR_LEN: usize = 46;
const MULTIHASH_SHA2_256: u64 = 0x12;
const MULTIHASH_BLAKE3: u64 = 0x1e;
const CODEC_RAW: u64 = 0x55;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CidError {
    #[error("empty cid")]
    Empty,
    #[error("invalid multibase string: {0}")]
    Multibase(String),
    #[error("unsupported cid version {0}")]
    UnsupportedVersion(u64),
    #[error("malformed varint at byte {0}")]
    Varint(usize),
    #[error("invalid multihash: expected {expected} digest bytes, got {got}")]
    DigestLength { expected: u64, got: usize },
    #[error("invalid cidv0: {0}")]
    InvalidV0(&'static str),
}

impl From<multibase::Error> for CidError {
    fn from(value: multibase::Error) -> Self {
        CidError::Multibase(value.to_string())
    }
}

/// The two CID versions in circulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CidVersion {
    V0,
    V1,
}

/// Content identifier.
///
/// ```
/// use pinset_core::Cid;
///
/// let cid: Cid = "QmXoypizjW3WknFiJnKLwHCnL72vedxjQkDDP1mXWo6uco".parse().unwrap();
/// assert_eq!(cid.to_string(), "QmXoypizjW3WknFiJnKLwHCnL72vedxjQkDDP1mXWo6uco");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cid(Bytes);

impl Cid {
    /// Builds a CIDv1 with the `raw` codec over the BLAKE3 digest of `data`.
    pub fn new_raw(data: impl AsRef<[u8]>) -> Self {
        let digest = blake3::hash(data.as_ref());
        let mut bytes = Vec::with_capacity(4 + 32);
        write_varint(&mut bytes, 1);
        write_varint(&mut bytes, CODEC_RAW);
        write_varint(&mut bytes, MULTIHASH_BLAKE3);
        write_varint(&mut bytes, 32);
        bytes.extend_from_slice(digest.as_bytes());
        Cid(bytes.into())
    }

    pub fn parse(s: &str) -> Result<Self, CidError> {
        if s.is_empty() {
            return Err(CidError::Empty);
        }
        if s.len() == CIDV0_STR_LEN && s.starts_with("Qm") {
            let bytes = multibase::Base::Base58Btc.decode(s)?;
            return Self::from_v0_bytes(bytes);
        }

        let (_, bytes) = multibase::decode(s)?;
        Self::from_v1_bytes(bytes)
    }

    /// Creates a `Cid` from its binary representation.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, CidError> {
        let bytes = bytes.into();
        if bytes.len() == 34 && bytes[0] as u64 == MULTIHASH_SHA2_256 && bytes[1] == 32 {
            Self::from_v0_bytes(bytes)
        } else {
            Self::from_v1_bytes(bytes)
        }
    }

    fn from_v0_bytes(bytes: Vec<u8>) -> Result<Self, CidError> {
        if bytes.len() != 34 {
            return Err(CidError::InvalidV0("multihash must be 34 bytes"));
        }
        if bytes[0] as u64 != MULTIHASH_SHA2_256 || bytes[1] != 32 {
            return Err(CidError::InvalidV0("multihash must be sha2-256"));
        }
        Ok(Cid(bytes.into()))
    }

    fn from_v1_bytes(bytes: Vec<u8>) -> Result<Self, CidError> {
        let mut pos = 0;
        let version = read_varint(&bytes, &mut pos)?;
        if version != 1 {
            return Err(CidError::UnsupportedVersion(version));
        }
        let _codec = read_varint(&bytes, &mut pos)?;
        let _mh_code = read_varint(&bytes, &mut pos)?;
        let digest_len = read_varint(&bytes, &mut pos)?;
        let got = bytes.len() - pos;
        if got as u64 != digest_len {
            return Err(CidError::DigestLength {
                expected: digest_len,
                got,
            });
        }
        Ok(Cid(bytes.into()))
    }

    pub fn version(&self) -> CidVersion {
        if self.0.len() == 34 && self.0[0] as u64 == MULTIHASH_SHA2_256 {
            CidVersion::V0
        } else {
            CidVersion::V1
        }
    }

    /// Multicodec of the referenced content. CIDv0 is always `dag-pb`.
    pub fn codec(&self) -> u64 {
        match self.version() {
            CidVersion::V0 => 0x70,
            CidVersion::V1 => {
                // Version, then codec; both validated on construction.
                let mut pos = 0;
                read_varint(&self.0, &mut pos)
                    .and_then(|_| read_varint(&self.0, &mut pos))
                    .unwrap_or_default()
            }
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Shortened string form for log lines.
    pub fn fmt_short(&self) -> String {
        let full = self.to_string();
        if full.len() <= 12 {
            return full;
        }
        let tail = data_encoding::HEXLOWER.encode(&self.0[self.0.len() - 3..]);
        format!("{}…{}", &full[..6], tail)
    }
}

fn read_varint(bytes: &[u8], pos: &mut usize) -> Result<u64, CidError> {
    let start = *pos;
    let mut value: u64 = 0;
    for shift in 0..9 {
        let Some(&byte) = bytes.get(*pos) else {
            return Err(CidError::Varint(start));
        };
        *pos += 1;
        value |= ((byte & 0x7f) as u64) << (shift * 7);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(CidError::Varint(start))
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version() {
            CidVersion::V0 => f.write_str(&multibase::Base::Base58Btc.encode(&self.0)),
            CidVersion::V1 => f.write_str(&multibase::encode(multibase::Base::Base32Lower, &self.0)),
        }
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Cid").field(&self.to_string()).finish()
    }
}

impl FromStr for Cid {
    type Err = CidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cid::parse(s)
    }
}

impl TryFrom<String> for Cid {
    type Error = CidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Cid::parse(&value)
    }
}

impl From<Cid> for String {
    fn from(value: Cid) -> Self {
        value.to_string()
    }
}

impl AsRef<[u8]> for Cid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
