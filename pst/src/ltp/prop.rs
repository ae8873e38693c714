//! Property types and values.
//!
//! A property is a 16-bit identifier, a 16-bit type code and raw bytes.
//! Decoding into a typed [`PropertyValue`] happens on demand; unknown type
//! codes keep their bytes.

use std::fmt;
use std::time::{Duration, SystemTime};

use crate::error::{Error, Location};
use crate::ndb::{Nid, read_u16, read_u32, read_u64};

/// Flag marking a multi-valued type.
const MULTI_VALUED: u16 = 0x1000;

/// A property type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropType {
    Integer16,
    Integer32,
    Floating32,
    Floating64,
    Currency,
    FloatingTime,
    ErrorCode,
    Boolean,
    Integer64,
    /// 8-bit string in the store's code page.
    String8,
    /// UTF-16LE string.
    String,
    Time,
    Guid,
    Binary,
    Object,
    MultipleInteger16,
    MultipleInteger32,
    MultipleFloating32,
    MultipleFloating64,
    MultipleCurrency,
    MultipleFloatingTime,
    MultipleInteger64,
    MultipleString8,
    MultipleString,
    MultipleTime,
    MultipleGuid,
    MultipleBinary,
    Unknown(u16),
}

impl PropType {
    #[must_use]
    pub const fn from_code(code: u16) -> Self {
        match code {
            0x0002 => Self::Integer16,
            0x0003 => Self::Integer32,
            0x0004 => Self::Floating32,
            0x0005 => Self::Floating64,
            0x0006 => Self::Currency,
            0x0007 => Self::FloatingTime,
            0x000A => Self::ErrorCode,
            0x000B => Self::Boolean,
            0x000D => Self::Object,
            0x0014 => Self::Integer64,
            0x001E => Self::String8,
            0x001F => Self::String,
            0x0040 => Self::Time,
            0x0048 => Self::Guid,
            0x0102 => Self::Binary,
            0x1002 => Self::MultipleInteger16,
            0x1003 => Self::MultipleInteger32,
            0x1004 => Self::MultipleFloating32,
            0x1005 => Self::MultipleFloating64,
            0x1006 => Self::MultipleCurrency,
            0x1007 => Self::MultipleFloatingTime,
            0x1014 => Self::MultipleInteger64,
            0x101E => Self::MultipleString8,
            0x101F => Self::MultipleString,
            0x1040 => Self::MultipleTime,
            0x1048 => Self::MultipleGuid,
            0x1102 => Self::MultipleBinary,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Integer16 => 0x0002,
            Self::Integer32 => 0x0003,
            Self::Floating32 => 0x0004,
            Self::Floating64 => 0x0005,
            Self::Currency => 0x0006,
            Self::FloatingTime => 0x0007,
            Self::ErrorCode => 0x000A,
            Self::Boolean => 0x000B,
            Self::Object => 0x000D,
            Self::Integer64 => 0x0014,
            Self::String8 => 0x001E,
            Self::String => 0x001F,
            Self::Time => 0x0040,
            Self::Guid => 0x0048,
            Self::Binary => 0x0102,
            Self::MultipleInteger16 => 0x1002,
            Self::MultipleInteger32 => 0x1003,
            Self::MultipleFloating32 => 0x1004,
            Self::MultipleFloating64 => 0x1005,
            Self::MultipleCurrency => 0x1006,
            Self::MultipleFloatingTime => 0x1007,
            Self::MultipleInteger64 => 0x1014,
            Self::MultipleString8 => 0x101E,
            Self::MultipleString => 0x101F,
            Self::MultipleTime => 0x1040,
            Self::MultipleGuid => 0x1048,
            Self::MultipleBinary => 0x1102,
            Self::Unknown(code) => code,
        }
    }

    #[must_use]
    pub const fn is_multi_valued(self) -> bool {
        self.code() & MULTI_VALUED != 0
    }

    /// Size of a single-valued fixed-width type, `None` for variable types.
    #[must_use]
    pub const fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Boolean => Some(1),
            Self::Integer16 => Some(2),
            Self::Integer32 | Self::Floating32 | Self::ErrorCode => Some(4),
            Self::Floating64
            | Self::Currency
            | Self::FloatingTime
            | Self::Integer64
            | Self::Time => Some(8),
            Self::Guid => Some(16),
            _ => None,
        }
    }
}

impl fmt::Display for PropType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "unknown(0x{code:04x})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// A FILETIME: 100-nanosecond intervals since 1601-01-01 UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileTime(pub u64);

impl FileTime {
    /// 100ns intervals between 1601-01-01 and 1970-01-01.
    const UNIX_EPOCH_OFFSET: u64 = 116_444_736_000_000_000;

    /// Seconds since the Unix epoch, negative before 1970.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)] // u64::MAX / 10^7 fits in i64
    pub const fn unix_seconds(self) -> i64 {
        (self.0 / 10_000_000) as i64 - (Self::UNIX_EPOCH_OFFSET / 10_000_000) as i64
    }

    /// The time as a `SystemTime`, `None` before the Unix epoch.
    #[must_use]
    pub fn to_system_time(self) -> Option<SystemTime> {
        let since_epoch = self.0.checked_sub(Self::UNIX_EPOCH_OFFSET)?;
        Some(SystemTime::UNIX_EPOCH + Duration::from_nanos(since_epoch.saturating_mul(100)))
    }
}

/// A decoded property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// No storage behind the value (HNID 0).
    Empty,
    Integer16(i16),
    Integer32(i32),
    Floating32(f32),
    Floating64(f64),
    /// Fixed point, scaled by 10 000.
    Currency(i64),
    /// OLE automation date.
    FloatingTime(f64),
    ErrorCode(u32),
    Boolean(bool),
    Integer64(i64),
    String(String),
    Time(FileTime),
    Guid([u8; 16]),
    Binary(Vec<u8>),
    /// Reference to a sub-node holding an embedded object.
    Object { nid: Nid, size: u32 },
    MultipleInteger16(Vec<i16>),
    MultipleInteger32(Vec<i32>),
    MultipleFloating32(Vec<f32>),
    MultipleFloating64(Vec<f64>),
    MultipleCurrency(Vec<i64>),
    MultipleFloatingTime(Vec<f64>),
    MultipleInteger64(Vec<i64>),
    MultipleString(Vec<String>),
    MultipleTime(Vec<FileTime>),
    MultipleGuid(Vec<[u8; 16]>),
    MultipleBinary(Vec<Vec<u8>>),
    Unknown { type_code: u16, bytes: Vec<u8> },
}

fn utf16_string(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let mut text = String::from_utf16_lossy(&units);
    text.truncate(text.trim_end_matches('\0').len());
    Some(text)
}

/// 8-bit strings are read as Latin-1.
fn string8(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    bytes[..end].iter().map(|&b| char::from(b)).collect()
}

fn guid(bytes: &[u8]) -> Option<[u8; 16]> {
    bytes.try_into().ok()
}

/// Split fixed-width elements, failing unless the bytes divide evenly.
fn fixed_elements<T>(bytes: &[u8], size: usize, parse: impl Fn(&[u8]) -> T) -> Option<Vec<T>> {
    (bytes.len() % size == 0).then(|| bytes.chunks_exact(size).map(parse).collect())
}

/// Split a variable-width multi-valued payload:
/// `count u32 | offsets [u32; count] | data`.
fn variable_elements(bytes: &[u8]) -> Option<Vec<&[u8]>> {
    if bytes.len() < 4 {
        return None;
    }
    let count = usize::try_from(read_u32(bytes, 0)).ok()?;
    let table_end = count.checked_mul(4)?.checked_add(4)?;
    if table_end > bytes.len() {
        return None;
    }
    let offsets: Vec<usize> = (0..count)
        .map(|i| usize::try_from(read_u32(bytes, 4 + i * 4)).ok())
        .collect::<Option<_>>()?;

    let mut elements = Vec::with_capacity(count);
    for (i, &start) in offsets.iter().enumerate() {
        let end = offsets.get(i + 1).copied().unwrap_or(bytes.len());
        if start < table_end || start > end || end > bytes.len() {
            return None;
        }
        elements.push(&bytes[start..end]);
    }
    Some(elements)
}

impl PropertyValue {
    /// Decode raw property bytes according to their type.
    ///
    /// Returns `None` when the bytes cannot hold a value of the type (for
    /// example a 3-byte `Integer32`). Unknown types never fail.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn decode(prop_type: PropType, bytes: &[u8]) -> Option<Self> {
        if let Some(size) = prop_type.fixed_size() {
            if bytes.len() < size {
                return None;
            }
        }
        let value = match prop_type {
            PropType::Integer16 => Self::Integer16(read_u16(bytes, 0) as i16),
            PropType::Integer32 => Self::Integer32(read_u32(bytes, 0) as i32),
            PropType::Floating32 => Self::Floating32(f32::from_bits(read_u32(bytes, 0))),
            PropType::Floating64 => Self::Floating64(f64::from_bits(read_u64(bytes, 0))),
            PropType::Currency => Self::Currency(read_u64(bytes, 0) as i64),
            PropType::FloatingTime => Self::FloatingTime(f64::from_bits(read_u64(bytes, 0))),
            PropType::ErrorCode => Self::ErrorCode(read_u32(bytes, 0)),
            PropType::Boolean => Self::Boolean(bytes[0] != 0),
            PropType::Integer64 => Self::Integer64(read_u64(bytes, 0) as i64),
            PropType::Time => Self::Time(FileTime(read_u64(bytes, 0))),
            PropType::Guid => Self::Guid(guid(&bytes[..16])?),
            PropType::String => Self::String(utf16_string(bytes)?),
            PropType::String8 => Self::String(string8(bytes)),
            PropType::Binary => Self::Binary(bytes.to_vec()),
            PropType::Object => {
                if bytes.len() < 8 {
                    return None;
                }
                Self::Object {
                    nid: Nid(read_u32(bytes, 0)),
                    size: read_u32(bytes, 4),
                }
            }
            PropType::MultipleInteger16 => {
                Self::MultipleInteger16(fixed_elements(bytes, 2, |b| read_u16(b, 0) as i16)?)
            }
            PropType::MultipleInteger32 => {
                Self::MultipleInteger32(fixed_elements(bytes, 4, |b| read_u32(b, 0) as i32)?)
            }
            PropType::MultipleFloating32 => Self::MultipleFloating32(fixed_elements(bytes, 4, |b| {
                f32::from_bits(read_u32(b, 0))
            })?),
            PropType::MultipleFloating64 => Self::MultipleFloating64(fixed_elements(bytes, 8, |b| {
                f64::from_bits(read_u64(b, 0))
            })?),
            PropType::MultipleCurrency => {
                Self::MultipleCurrency(fixed_elements(bytes, 8, |b| read_u64(b, 0) as i64)?)
            }
            PropType::MultipleFloatingTime => Self::MultipleFloatingTime(fixed_elements(
                bytes,
                8,
                |b| f64::from_bits(read_u64(b, 0)),
            )?),
            PropType::MultipleInteger64 => {
                Self::MultipleInteger64(fixed_elements(bytes, 8, |b| read_u64(b, 0) as i64)?)
            }
            PropType::MultipleTime => {
                Self::MultipleTime(fixed_elements(bytes, 8, |b| FileTime(read_u64(b, 0)))?)
            }
            PropType::MultipleGuid => Self::MultipleGuid(
                fixed_elements(bytes, 16, guid)?
                    .into_iter()
                    .collect::<Option<_>>()?,
            ),
            PropType::MultipleString => Self::MultipleString(
                variable_elements(bytes)?
                    .into_iter()
                    .map(utf16_string)
                    .collect::<Option<_>>()?,
            ),
            PropType::MultipleString8 => Self::MultipleString(
                variable_elements(bytes)?.into_iter().map(string8).collect(),
            ),
            PropType::MultipleBinary => Self::MultipleBinary(
                variable_elements(bytes)?
                    .into_iter()
                    .map(<[u8]>::to_vec)
                    .collect(),
            ),
            PropType::Unknown(type_code) => Self::Unknown {
                type_code,
                bytes: bytes.to_vec(),
            },
        };
        Some(value)
    }
}

/// One property of a node or table row, with its bytes resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub id: u16,
    pub prop_type: PropType,
    /// Value bytes: inline data, a heap allocation or sub-node data.
    /// Empty when the value has no storage.
    pub data: Vec<u8>,
}

impl Property {
    /// The 32-bit property tag: identifier high, type low.
    #[must_use]
    pub const fn tag(&self) -> u32 {
        ((self.id as u32) << 16) | self.prop_type.code() as u32
    }

    /// Decode the value.
    ///
    /// # Errors
    ///
    /// `CorruptStructure` at the property when its bytes do not fit its
    /// type.
    pub fn value(&self) -> Result<PropertyValue, Error> {
        if self.data.is_empty() && self.prop_type.fixed_size().is_none() {
            if matches!(self.prop_type, PropType::Object) {
                return Ok(PropertyValue::Empty);
            }
            if let PropType::Unknown(type_code) = self.prop_type {
                return Ok(PropertyValue::Unknown {
                    type_code,
                    bytes: Vec::new(),
                });
            }
        }
        PropertyValue::decode(self.prop_type, &self.data).ok_or_else(|| {
            Error::corrupt(
                Location::Property(self.id),
                format!(
                    "{} bytes do not hold a {} value",
                    self.data.len(),
                    self.prop_type
                ),
            )
        })
    }
}

/// Read access to a set of properties: a property context or a table row.
///
/// The typed accessors return `None` when the property is missing or of
/// an incompatible type.
pub trait PropertyView {
    fn property(&self, id: u16) -> Option<&Property>;

    fn value(&self, id: u16) -> Option<PropertyValue> {
        self.property(id).and_then(|p| p.value().ok())
    }

    fn string(&self, id: u16) -> Option<String> {
        match self.value(id)? {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    fn i32(&self, id: u16) -> Option<i32> {
        match self.value(id)? {
            PropertyValue::Integer16(v) => Some(i32::from(v)),
            PropertyValue::Integer32(v) => Some(v),
            _ => None,
        }
    }

    #[allow(clippy::cast_sign_loss)]
    fn u32(&self, id: u16) -> Option<u32> {
        match self.value(id)? {
            PropertyValue::Integer32(v) => Some(v as u32),
            PropertyValue::ErrorCode(v) => Some(v),
            PropertyValue::Integer16(v) => u32::try_from(v).ok(),
            _ => None,
        }
    }

    fn i64(&self, id: u16) -> Option<i64> {
        match self.value(id)? {
            PropertyValue::Integer16(v) => Some(i64::from(v)),
            PropertyValue::Integer32(v) => Some(i64::from(v)),
            PropertyValue::Integer64(v) | PropertyValue::Currency(v) => Some(v),
            _ => None,
        }
    }

    fn bool(&self, id: u16) -> Option<bool> {
        match self.value(id)? {
            PropertyValue::Boolean(v) => Some(v),
            _ => None,
        }
    }

    fn time(&self, id: u16) -> Option<FileTime> {
        match self.value(id)? {
            PropertyValue::Time(v) => Some(v),
            _ => None,
        }
    }

    fn binary(&self, id: u16) -> Option<&[u8]> {
        self.property(id)
            .filter(|p| p.prop_type == PropType::Binary)
            .map(|p| p.data.as_slice())
    }
}

/// Well-known property identifiers.
pub mod tags {
    pub const IMPORTANCE: u16 = 0x0017;
    pub const MESSAGE_CLASS: u16 = 0x001A;
    pub const SUBJECT: u16 = 0x0037;
    pub const CLIENT_SUBMIT_TIME: u16 = 0x0039;
    pub const RECIPIENT_TYPE: u16 = 0x0C15;
    pub const SENDER_NAME: u16 = 0x0C1A;
    pub const SENDER_EMAIL_ADDRESS: u16 = 0x0C1F;
    pub const MESSAGE_DELIVERY_TIME: u16 = 0x0E06;
    pub const MESSAGE_FLAGS: u16 = 0x0E07;
    pub const MESSAGE_SIZE: u16 = 0x0E08;
    pub const HAS_ATTACHMENTS: u16 = 0x0E1B;
    pub const ATTACH_SIZE: u16 = 0x0E20;
    pub const BODY: u16 = 0x1000;
    pub const DISPLAY_NAME: u16 = 0x3001;
    pub const ADDRESS_TYPE: u16 = 0x3002;
    pub const EMAIL_ADDRESS: u16 = 0x3003;
    pub const CREATION_TIME: u16 = 0x3007;
    pub const LAST_MODIFICATION_TIME: u16 = 0x3008;
    pub const SMTP_ADDRESS: u16 = 0x39FE;
    pub const ATTACH_DATA: u16 = 0x3701;
    pub const ATTACH_EXTENSION: u16 = 0x3703;
    pub const ATTACH_FILENAME: u16 = 0x3704;
    pub const ATTACH_METHOD: u16 = 0x3705;
    pub const ATTACH_LONG_FILENAME: u16 = 0x3707;
    pub const ATTACH_PATHNAME: u16 = 0x3708;
    pub const RENDERING_POSITION: u16 = 0x370B;
    pub const ATTACH_LONG_PATHNAME: u16 = 0x370D;
    pub const ATTACH_MIME_TAG: u16 = 0x370E;
    pub const ATTACH_MIME_SEQUENCE: u16 = 0x3710;
    pub const ATTACH_CONTENT_ID: u16 = 0x3712;
    pub const ATTACH_CONTENT_LOCATION: u16 = 0x3713;
    pub const ATTACH_FLAGS: u16 = 0x3714;
    pub const LTP_ROW_ID: u16 = 0x67F2;
    pub const LTP_ROW_VERSION: u16 = 0x67F3;
}
