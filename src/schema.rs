//! Declarative byte layouts for command payloads and SEL records.
//!
//! A [`Layout`] is an ordered list of [`Field`] descriptors (byte offset,
//! width, endianness and an optional bit range). [`Layout::decode`] and
//! [`Layout::encode`] are the only routines that touch offsets; command and
//! record code works with named values.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Byte order of a multi-byte field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Least-significant byte first (the IPMI default).
    Little,
    /// Most-significant byte first.
    Big,
}

/// One named field of a [`Layout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    name: &'static str,
    offset: usize,
    width: usize,
    endian: Endian,
    // Bit range inside the (single) byte; `len == 0` means the whole value.
    shift: u8,
    len: u8,
}

impl Field {
    /// A single byte.
    pub const fn byte(name: &'static str, offset: usize) -> Self {
        Self::le(name, offset, 1)
    }

    /// A little-endian integer of `width` bytes (1..=8).
    pub const fn le(name: &'static str, offset: usize, width: usize) -> Self {
        Self {
            name,
            offset,
            width,
            endian: Endian::Little,
            shift: 0,
            len: 0,
        }
    }

    /// A big-endian integer of `width` bytes (1..=8).
    pub const fn be(name: &'static str, offset: usize, width: usize) -> Self {
        Self {
            name,
            offset,
            width,
            endian: Endian::Big,
            shift: 0,
            len: 0,
        }
    }

    /// `len` bits starting at bit `shift` of the byte at `offset`.
    pub const fn bits(name: &'static str, offset: usize, shift: u8, len: u8) -> Self {
        Self {
            name,
            offset,
            width: 1,
            endian: Endian::Little,
            shift,
            len,
        }
    }

    /// Field name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// One past the last byte this field occupies.
    pub fn end(&self) -> usize {
        self.offset + self.width
    }

    fn mask(&self) -> u64 {
        if self.len > 0 {
            (1u64 << self.len) - 1
        } else if self.width >= 8 {
            u64::MAX
        } else {
            (1u64 << (self.width * 8)) - 1
        }
    }

    /// Read the field from `bytes`, or `None` when `bytes` is too short.
    pub fn read(&self, bytes: &[u8]) -> Option<u64> {
        let raw = bytes.get(self.offset..self.end())?;
        let value = match self.endian {
            Endian::Little => raw
                .iter()
                .rev()
                .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
            Endian::Big => raw.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
        };
        Some((value >> self.shift) & self.mask())
    }

    fn write(&self, value: u64, out: &mut [u8]) -> Result<()> {
        if value & !self.mask() != 0 {
            return Err(Error::protocol_owned(format!(
                "value {value:#x} does not fit field `{}`",
                self.name
            )));
        }
        let end = self.end();
        let dst = out
            .get_mut(self.offset..end)
            .ok_or(Error::Protocol("field outside layout"))?;

        if self.len > 0 {
            let mask = (self.mask() as u8) << self.shift;
            dst[0] = (dst[0] & !mask) | ((value as u8) << self.shift);
            return Ok(());
        }

        let le = value.to_le_bytes();
        match self.endian {
            Endian::Little => dst.copy_from_slice(&le[..self.width]),
            Endian::Big => {
                for (slot, b) in dst.iter_mut().zip(le[..self.width].iter().rev()) {
                    *slot = *b;
                }
            }
        }
        Ok(())
    }
}

/// An ordered set of fields describing one fixed-size byte layout.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    name: &'static str,
    fields: &'static [Field],
}

impl Layout {
    /// Declare a layout.
    pub const fn new(name: &'static str, fields: &'static [Field]) -> Self {
        Self { name, fields }
    }

    /// Layout name (used in error messages).
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Minimum number of bytes covering every field.
    pub fn len(&self) -> usize {
        self.fields.iter().map(Field::end).max().unwrap_or(0)
    }

    /// Whether the layout has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look up a field descriptor.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Read one named field without decoding the whole layout.
    pub fn read(&self, name: &str, bytes: &[u8]) -> Result<u64> {
        let field = self
            .field(name)
            .ok_or_else(|| Error::protocol_owned(format!("{}: no field `{name}`", self.name)))?;
        field
            .read(bytes)
            .ok_or_else(|| self.short(bytes.len()))
    }

    /// Unpack `bytes` into named values. Trailing bytes are ignored.
    pub fn decode(&self, bytes: &[u8]) -> Result<Fields> {
        if bytes.len() < self.len() {
            return Err(self.short(bytes.len()));
        }
        let mut out = Fields::new();
        for field in self.fields {
            let value = field.read(bytes).ok_or_else(|| self.short(bytes.len()))?;
            out.set(field.name, value);
        }
        Ok(out)
    }

    /// Pack named values into a buffer of [`Layout::len`] bytes.
    ///
    /// Every field must be present in `fields`.
    pub fn encode(&self, fields: &Fields) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.len()];
        for field in self.fields {
            let value = fields.get(field.name).ok_or_else(|| {
                Error::protocol_owned(format!("{}: missing field `{}`", self.name, field.name))
            })?;
            field.write(value, &mut out)?;
        }
        Ok(out)
    }

    fn short(&self, got: usize) -> Error {
        Error::protocol_owned(format!(
            "{}: need {} bytes, got {got}",
            self.name,
            self.len()
        ))
    }
}

/// Named field values produced by [`Layout::decode`] or consumed by [`Layout::encode`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields(BTreeMap<&'static str, u64>);

impl Fields {
    /// An empty value set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &'static str, value: impl Into<u64>) -> Self {
        self.set(name, value);
        self
    }

    /// Insert or replace a value.
    pub fn set(&mut self, name: &'static str, value: impl Into<u64>) {
        self.0.insert(name, value.into());
    }

    /// Value of `name`, if present.
    pub fn get(&self, name: &str) -> Option<u64> {
        self.0.get(name).copied()
    }

    /// Value of `name` narrowed to `u8`.
    pub fn u8(&self, name: &str) -> Result<u8> {
        self.narrow(name)
    }

    /// Value of `name` narrowed to `u16`.
    pub fn u16(&self, name: &str) -> Result<u16> {
        self.narrow(name)
    }

    /// Value of `name` narrowed to `u32`.
    pub fn u32(&self, name: &str) -> Result<u32> {
        self.narrow(name)
    }

    fn narrow<T: TryFrom<u64>>(&self, name: &str) -> Result<T> {
        let value = self
            .get(name)
            .ok_or_else(|| Error::protocol_owned(format!("missing field `{name}`")))?;
        T::try_from(value)
            .map_err(|_| Error::protocol_owned(format!("field `{name}` out of range")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: Layout = Layout::new(
        "header",
        &[
            Field::le("id", 0, 2),
            Field::byte("kind", 2),
            Field::bits("low", 3, 0, 4),
            Field::bits("high", 3, 4, 4),
            Field::be("tail", 4, 3),
        ],
    );

    #[test]
    fn decode_reads_every_field() {
        let fields = HEADER
            .decode(&[0x34, 0x12, 0x02, 0xA5, 0x01, 0x02, 0x03, 0xEE])
            .expect("decode");
        assert_eq!(fields.u16("id").expect("id"), 0x1234);
        assert_eq!(fields.u8("kind").expect("kind"), 0x02);
        assert_eq!(fields.u8("low").expect("low"), 0x05);
        assert_eq!(fields.u8("high").expect("high"), 0x0A);
        assert_eq!(fields.u32("tail").expect("tail"), 0x010203);
    }

    #[test]
    fn encode_packs_shared_bytes() {
        let fields = Fields::new()
            .with("id", 0xBEEFu16)
            .with("kind", 0x02u8)
            .with("low", 0x0Cu8)
            .with("high", 0x03u8)
            .with("tail", 0x0A0B0Cu32);
        let bytes = HEADER.encode(&fields).expect("encode");
        assert_eq!(bytes, vec![0xEF, 0xBE, 0x02, 0x3C, 0x0A, 0x0B, 0x0C]);
        assert_eq!(HEADER.decode(&bytes).expect("decode"), fields);
    }

    #[test]
    fn short_input_is_rejected() {
        let err = HEADER.decode(&[0x00, 0x01]).unwrap_err();
        assert!(matches!(err, Error::ProtocolOwned(_)));
        assert!(HEADER.read("id", &[0x01, 0x00]).is_ok());
        assert!(HEADER.read("tail", &[0x01, 0x00]).is_err());
    }

    #[test]
    fn encode_rejects_missing_and_oversized_values() {
        let fields = Fields::new().with("id", 1u8);
        assert!(HEADER.encode(&fields).is_err());

        let fields = Fields::new()
            .with("id", 1u8)
            .with("kind", 1u8)
            .with("low", 0x10u8)
            .with("high", 0u8)
            .with("tail", 0u8);
        assert!(HEADER.encode(&fields).is_err());
    }
}
