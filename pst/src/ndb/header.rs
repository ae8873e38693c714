//! File header parsing.
//!
//! The header occupies the first 564 bytes of the file (Unicode layout) and
//! is the only structure whose corruption makes the whole file unreadable.
//!
//! # Layout (selected fields)
//!
//! ```text
//! 0    dwMagic        "!BDN"
//! 4    dwCRCPartial   CRC of 471 bytes from offset 8
//! 8    wMagicClient   "SM"
//! 10   wVer           >= 23 for the Unicode layout
//! 12   wVerClient
//! 32   bidNextP
//! 40   dwUnique
//! 180  ROOT           (see `Root`)
//! 512  bSentinel      0x80
//! 513  bCryptMethod
//! 516  bidNextB
//! 524  dwCRCFull      CRC of 516 bytes from offset 8
//! ```

use std::fmt;

use crate::error::{Error, Location};
use crate::ndb::Bid;
use crate::ndb::page::{compute_crc, read_u16, read_u32, read_u64};

/// Size of the Unicode header in bytes.
pub const HEADER_SIZE: usize = 564;

/// File magic.
pub const MAGIC: [u8; 4] = *b"!BDN";

/// Client magic for PST files.
pub const MAGIC_CLIENT: [u8; 2] = *b"SM";

/// Lowest `wVer` using the Unicode layout.
pub const MIN_UNICODE_VERSION: u16 = 23;

const SENTINEL: u8 = 0x80;
const PARTIAL_CRC_LEN: usize = 471;
const FULL_CRC_LEN: usize = 516;

/// A block reference: identifier plus absolute file offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bref {
    pub bid: Bid,
    pub ib: u64,
}

impl Bref {
    /// Size on disk.
    pub const SIZE: usize = 16;

    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bid: Bid(read_u64(bytes, 0)),
            ib: read_u64(bytes, 8),
        }
    }
}

/// Block encoding declared by the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CryptMethod {
    None,
    Permute,
    Cyclic,
    /// Windows Information Protection.
    Edp,
    Unknown(u8),
}

impl CryptMethod {
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::None,
            0x01 => Self::Permute,
            0x02 => Self::Cyclic,
            0x10 => Self::Edp,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::None => 0x00,
            Self::Permute => 0x01,
            Self::Cyclic => 0x02,
            Self::Edp => 0x10,
            Self::Unknown(code) => code,
        }
    }
}

impl fmt::Display for CryptMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Permute => write!(f, "permute"),
            Self::Cyclic => write!(f, "cyclic"),
            Self::Edp => write!(f, "edp"),
            Self::Unknown(code) => write!(f, "unknown(0x{code:02x})"),
        }
    }
}

/// The ROOT structure embedded in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Root {
    pub file_eof: u64,
    pub amap_last: u64,
    pub amap_free: u64,
    pub pmap_free: u64,
    pub nbt: Bref,
    pub bbt: Bref,
    pub amap_valid: u8,
}

impl Root {
    const OFFSET: usize = 180;

    fn parse(bytes: &[u8]) -> Self {
        let base = Self::OFFSET;
        Self {
            file_eof: read_u64(bytes, base + 4),
            amap_last: read_u64(bytes, base + 12),
            amap_free: read_u64(bytes, base + 20),
            pmap_free: read_u64(bytes, base + 28),
            nbt: Bref::from_bytes(&bytes[base + 36..base + 52]),
            bbt: Bref::from_bytes(&bytes[base + 52..base + 68]),
            amap_valid: bytes[base + 68],
        }
    }
}

/// Parsed file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u16,
    pub client_version: u16,
    pub next_page_bid: Bid,
    pub unique: u32,
    pub root: Root,
    pub crypt_method: CryptMethod,
    pub next_block_bid: Bid,
}

impl Header {
    /// Parse the header from the first `HEADER_SIZE` bytes of a file.
    ///
    /// # Errors
    ///
    /// `CorruptStructure` at offset 0 when the magic, version, sentinel or
    /// either header CRC is wrong. The ANSI (pre-Unicode) layout is
    /// rejected as an unsupported version.
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        let at = Location::Offset(0);
        if bytes.len() < HEADER_SIZE {
            return Err(Error::corrupt(
                at,
                format!("header is {} bytes, need {HEADER_SIZE}", bytes.len()),
            ));
        }
        if bytes[0..4] != MAGIC {
            return Err(Error::corrupt(at, "bad file magic"));
        }
        if bytes[8..10] != MAGIC_CLIENT {
            return Err(Error::corrupt(at, "bad client magic"));
        }

        let version = read_u16(bytes, 10);
        if version < MIN_UNICODE_VERSION {
            return Err(Error::corrupt(
                at,
                format!("unsupported format version {version} (ANSI layout)"),
            ));
        }

        let partial = compute_crc(&bytes[8..8 + PARTIAL_CRC_LEN]);
        let stored_partial = read_u32(bytes, 4);
        if partial != stored_partial {
            return Err(Error::corrupt(
                at,
                format!("partial header checksum mismatch: expected 0x{stored_partial:08x}, got 0x{partial:08x}"),
            ));
        }
        let full = compute_crc(&bytes[8..8 + FULL_CRC_LEN]);
        let stored_full = read_u32(bytes, 524);
        if full != stored_full {
            return Err(Error::corrupt(
                at,
                format!("full header checksum mismatch: expected 0x{stored_full:08x}, got 0x{full:08x}"),
            ));
        }

        if bytes[512] != SENTINEL {
            return Err(Error::corrupt(
                at,
                format!("bad sentinel: 0x{:02x}", bytes[512]),
            ));
        }

        Ok(Self {
            version,
            client_version: read_u16(bytes, 12),
            next_page_bid: Bid(read_u64(bytes, 32)),
            unique: read_u32(bytes, 40),
            root: Root::parse(bytes),
            crypt_method: CryptMethod::from_code(bytes[513]),
            next_block_bid: Bid(read_u64(bytes, 516)),
        })
    }
}
