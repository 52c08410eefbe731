//! Names directory and the parallel name hash table.
//!
//! Names directory entry layout: `len: u8 | text[len] | terminator: u8`.
//! Export records and the payload refer to names by their position, so
//! decoding preserves order exactly.  Text is kept as raw bytes: engine
//! names are usually ASCII but nothing stops a Latin-1 byte from showing up,
//! and re-encoding must give back the same run.

pub mod hash;

use std::borrow::Cow;
use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Serialize, Serializer};

use crate::container::ContainerError;

pub use hash::{city_hash64, name_hash, name_hash_bytes};

/// Algorithm id found at the head of every hash table written by the engine
/// (CityHash64 over lowercased names).
pub const CITYHASH64_ALGORITHM_ID: u64 = 0xC164_0000;

// ── Name ─────────────────────────────────────────────────────────────────────

/// One names-directory entry, byte for byte.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Name(Vec<u8>);

impl Name {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// `None` when the stored bytes are not UTF-8.
    pub fn to_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// CityHash64 of the lowercased bytes, as stored in the hash table.
    pub fn city_hash(&self) -> u64 {
        name_hash_bytes(&self.0)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.to_string_lossy())
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<Vec<u8>> for Name {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Name {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl PartialEq<str> for Name {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.as_bytes()
    }
}

impl PartialEq<&str> for Name {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.as_bytes()
    }
}

/// Serialized as text; invalid UTF-8 is replaced.
impl Serialize for Name {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string_lossy())
    }
}

// ── Directory ────────────────────────────────────────────────────────────────

/// Decode a names directory run.
///
/// A tail made only of zero bytes is alignment padding and ends the table.
/// A record whose length byte promises more than what is left is
/// [`ContainerError::MalformedTable`].  The terminator byte is not checked.
///
/// Because of the padding rule a trailing empty name reads back as padding
/// and is dropped; [`encode_names`] refuses to write one.
pub fn decode_names(buf: &[u8]) -> Result<Vec<Name>, ContainerError> {
    let mut names = Vec::new();
    let mut rest = buf;
    while !rest.is_empty() {
        if rest.iter().all(|&b| b == 0) {
            break;
        }
        let len = rest[0] as usize;
        let record = len + 2;
        if rest.len() < record {
            return Err(ContainerError::MalformedTable {
                table: "names directory",
                reason: format!(
                    "entry {} needs {record} bytes but only {} remain",
                    names.len(),
                    rest.len()
                ),
            });
        }
        names.push(Name::from(&rest[1..1 + len]));
        rest = &rest[record..];
    }
    Ok(names)
}

/// Inverse of [`decode_names`]. Names longer than 255 bytes cannot be
/// stored, and neither can an empty last name.
pub fn encode_names(names: &[Name]) -> Result<Vec<u8>, ContainerError> {
    if names.last().is_some_and(Name::is_empty) {
        return Err(ContainerError::MalformedTable {
            table: "names directory",
            reason: format!("entry {} is empty and would read back as padding", names.len() - 1),
        });
    }
    let mut out = Vec::with_capacity(names.iter().map(|n| n.len() + 2).sum());
    for (i, name) in names.iter().enumerate() {
        let len = u8::try_from(name.len()).map_err(|_| ContainerError::MalformedTable {
            table: "names directory",
            reason: format!("entry {i} is {} bytes long (max 255)", name.len()),
        })?;
        out.push(len);
        out.extend_from_slice(name.as_bytes());
        out.push(0);
    }
    Ok(out)
}

// ── Hash table ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameHashTable {
    pub algorithm_id: u64,
    /// One entry per name, same order as the names directory.
    pub hashes: Vec<u64>,
}

impl NameHashTable {
    /// Returns `Ok(None)` for an empty region.
    pub fn decode(buf: &[u8]) -> Result<Option<Self>, ContainerError> {
        if buf.is_empty() {
            return Ok(None);
        }
        if buf.len() % 8 != 0 {
            return Err(ContainerError::MalformedTable {
                table: "names hashes",
                reason: format!("{} bytes is not a multiple of 8", buf.len()),
            });
        }
        let algorithm_id = LittleEndian::read_u64(&buf[..8]);
        let hashes = buf[8..].chunks_exact(8).map(LittleEndian::read_u64).collect();
        Ok(Some(Self { algorithm_id, hashes }))
    }

    pub fn build(names: &[Name]) -> Self {
        Self {
            algorithm_id: CITYHASH64_ALGORITHM_ID,
            hashes: names.iter().map(Name::city_hash).collect(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; 8 * (self.hashes.len() + 1)];
        LittleEndian::write_u64(&mut out[..8], self.algorithm_id);
        LittleEndian::write_u64_into(&self.hashes, &mut out[8..]);
        out
    }

    /// Indices whose stored hash disagrees with the recomputed one, including
    /// names with no stored hash at all.
    pub fn mismatches(&self, names: &[Name]) -> Vec<usize> {
        names
            .iter()
            .enumerate()
            .filter(|(i, name)| self.hashes.get(*i) != Some(&name.city_hash()))
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn owned(names: &[&str]) -> Vec<Name> {
        names.iter().map(|s| Name::from(*s)).collect()
    }

    #[test]
    fn test_single_entry() {
        let buf = [0x03, b'F', b'o', b'o', 0x00];
        assert_eq!(decode_names(&buf).unwrap(), owned(&["Foo"]));
    }

    #[test]
    fn test_zero_padding_ends_table() {
        let mut buf = vec![0x03, b'F', b'o', b'o', 0x00];
        buf.resize(10, 0);
        assert_eq!(decode_names(&buf).unwrap(), owned(&["Foo"]));
    }

    #[test]
    fn test_empty_input() {
        assert!(decode_names(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_overrun_is_malformed() {
        let buf = [0x02, b'a', b'b', 0x00, 0x05, b'x', b'y'];
        let err = decode_names(&buf).unwrap_err();
        assert!(matches!(err, ContainerError::MalformedTable { table: "names directory", .. }));
    }

    #[test]
    fn test_missing_terminator_is_malformed() {
        let buf = [0x03, b'F', b'o', b'o'];
        assert!(matches!(
            decode_names(&buf),
            Err(ContainerError::MalformedTable { .. })
        ));
    }

    #[test]
    fn test_overlong_name_rejected() {
        let names = vec![Name::from("x".repeat(256))];
        assert!(encode_names(&names).is_err());
    }

    #[test]
    fn test_non_utf8_bytes_survive() {
        let buf = [0x04, b'C', b'a', b'f', 0xE9, 0x00];
        let names = decode_names(&buf).unwrap();
        assert_eq!(names[0].as_bytes(), b"Caf\xE9");
        assert_eq!(names[0].to_str(), None);
        assert_eq!(names[0].to_string(), "Caf\u{FFFD}");
        assert_eq!(encode_names(&names).unwrap(), buf);
        assert_eq!(names[0].city_hash(), city_hash64(b"caf\xE9"));
    }

    #[test]
    fn test_trailing_empty_name_is_padding() {
        // What ["Foo", ""] would encode to: the empty entry reads as padding.
        let buf = [0x03, b'F', b'o', b'o', 0x00, 0x00, 0x00];
        assert_eq!(decode_names(&buf).unwrap(), owned(&["Foo"]));

        assert!(matches!(
            encode_names(&owned(&["Foo", ""])),
            Err(ContainerError::MalformedTable { table: "names directory", .. })
        ));
        // An empty name followed by a real one is fine.
        let inner = owned(&["", "Foo"]);
        let bytes = encode_names(&inner).unwrap();
        assert_eq!(bytes, [0x00, 0x00, 0x03, b'F', b'o', b'o', 0x00]);
        assert_eq!(decode_names(&bytes).unwrap(), inner);
    }

    #[test]
    fn test_hash_table_roundtrip_and_verify() {
        let names = owned(&["None", "/Script/Engine", "Texture2D"]);
        let table = NameHashTable::build(&names);
        let bytes = table.encode();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[..8], &CITYHASH64_ALGORITHM_ID.to_le_bytes());

        let decoded = NameHashTable::decode(&bytes).unwrap().unwrap();
        assert_eq!(decoded, table);
        assert!(decoded.mismatches(&names).is_empty());

        let mut renamed = names.clone();
        renamed[1] = "/Script/CoreUObject".into();
        assert_eq!(decoded.mismatches(&renamed), vec![1]);
    }

    #[test]
    fn test_hash_table_empty_and_ragged() {
        assert_eq!(NameHashTable::decode(&[]).unwrap(), None);
        assert!(NameHashTable::decode(&[0u8; 12]).is_err());
    }

    proptest! {
        #[test]
        fn prop_names_decode_then_encode_is_identity(
            names in proptest::collection::vec("[A-Za-z0-9_/.]{1,40}", 0..24)
        ) {
            let names: Vec<Name> = names.into_iter().map(Name::from).collect();
            let encoded = encode_names(&names).unwrap();
            let decoded = decode_names(&encoded).unwrap();
            prop_assert_eq!(&decoded, &names);
            prop_assert_eq!(encode_names(&decoded).unwrap(), encoded);
        }

        #[test]
        fn prop_arbitrary_name_bytes_reencode_exactly(
            mut raw in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 0..48), 0..16),
            last in proptest::collection::vec(any::<u8>(), 1..48),
        ) {
            raw.push(last);
            let names: Vec<Name> = raw.into_iter().map(Name::from).collect();
            let encoded = encode_names(&names).unwrap();
            let decoded = decode_names(&encoded).unwrap();
            prop_assert_eq!(&decoded, &names);
            prop_assert_eq!(encode_names(&decoded).unwrap(), encoded);
        }
    }
}
