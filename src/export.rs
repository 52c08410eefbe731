//! Export record table: a packed run of fixed 72-byte records.
//!
//! Record layout (little-endian):
//!
//! | offset | size | field               |
//! |--------|------|---------------------|
//! |  0     |  8   | `serial_offset`     |
//! |  8     |  8   | `serial_size`       |
//! | 16     |  8   | `object_name_index` |
//! | 24     |  8   | `class_name_index`  |
//! | 32     | 40   | `other_properties`  |

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{self, Read, Write};

use crate::container::ContainerError;
use crate::names::Name;

pub const EXPORT_RECORD_SIZE: usize = 72;
pub const OTHER_PROPERTIES_LEN: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRecord {
    /// Offset of this export's payload in the original, uncombined layout.
    pub serial_offset: u64,
    pub serial_size: u64,
    pub object_name_index: u64,
    pub class_name_index: u64,
    /// Kept byte-for-byte; never interpreted.
    #[serde(serialize_with = "hex::serde::serialize")]
    pub other_properties: [u8; OTHER_PROPERTIES_LEN],
}

impl Default for ExportRecord {
    fn default() -> Self {
        Self {
            serial_offset: 0,
            serial_size: 0,
            object_name_index: 0,
            class_name_index: 0,
            other_properties: [0u8; OTHER_PROPERTIES_LEN],
        }
    }
}

impl ExportRecord {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.serial_offset)?;
        writer.write_u64::<LittleEndian>(self.serial_size)?;
        writer.write_u64::<LittleEndian>(self.object_name_index)?;
        writer.write_u64::<LittleEndian>(self.class_name_index)?;
        writer.write_all(&self.other_properties)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let serial_offset = reader.read_u64::<LittleEndian>()?;
        let serial_size = reader.read_u64::<LittleEndian>()?;
        let object_name_index = reader.read_u64::<LittleEndian>()?;
        let class_name_index = reader.read_u64::<LittleEndian>()?;
        let mut other_properties = [0u8; OTHER_PROPERTIES_LEN];
        reader.read_exact(&mut other_properties)?;
        Ok(Self {
            serial_offset,
            serial_size,
            object_name_index,
            class_name_index,
            other_properties,
        })
    }

    pub fn object_name<'a>(&self, names: &'a [Name]) -> Option<&'a Name> {
        lookup(names, self.object_name_index)
    }

    pub fn class_name<'a>(&self, names: &'a [Name]) -> Option<&'a Name> {
        lookup(names, self.class_name_index)
    }
}

pub(crate) fn lookup(names: &[Name], index: u64) -> Option<&Name> {
    usize::try_from(index).ok().and_then(|i| names.get(i))
}

/// Decode a whole export table. The run must be an exact multiple of
/// [`EXPORT_RECORD_SIZE`].
pub fn decode_exports(buf: &[u8]) -> Result<Vec<ExportRecord>, ContainerError> {
    if buf.len() % EXPORT_RECORD_SIZE != 0 {
        return Err(ContainerError::MalformedTable {
            table: "export objects",
            reason: format!(
                "{} bytes is not a multiple of the {EXPORT_RECORD_SIZE}-byte record size",
                buf.len()
            ),
        });
    }
    buf.chunks_exact(EXPORT_RECORD_SIZE)
        .map(|chunk| ExportRecord::read(chunk).map_err(ContainerError::from))
        .collect()
}

pub fn encode_exports(records: &[ExportRecord]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.len() * EXPORT_RECORD_SIZE);
    for rec in records {
        // Vec<u8> writes are infallible.
        let _ = rec.write(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(seed: u8) -> ExportRecord {
        ExportRecord {
            serial_offset: 0x1000 + seed as u64,
            serial_size: 0x20,
            object_name_index: 1,
            class_name_index: 2,
            other_properties: [seed; OTHER_PROPERTIES_LEN],
        }
    }

    #[test]
    fn test_record_is_72_bytes() {
        let mut buf = Vec::new();
        record(7).write(&mut buf).unwrap();
        assert_eq!(buf.len(), EXPORT_RECORD_SIZE);
        assert_eq!(&buf[0..8], &0x1007u64.to_le_bytes());
        assert_eq!(&buf[32..], &[7u8; OTHER_PROPERTIES_LEN]);
    }

    #[test]
    fn test_decode_table() {
        let bytes = encode_exports(&[record(1), record(2), record(3)]);
        let decoded = decode_exports(&bytes).unwrap();
        assert_eq!(decoded, vec![record(1), record(2), record(3)]);
    }

    #[test]
    fn test_empty_table() {
        assert!(decode_exports(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_name_lookup() {
        let names: Vec<Name> = vec!["None".into(), "Foo".into(), "Texture2D".into()];
        let rec = record(0);
        assert_eq!(rec.object_name(&names).unwrap(), "Foo");
        assert_eq!(rec.class_name(&names).unwrap(), "Texture2D");
        let stray = ExportRecord { object_name_index: 99, ..record(0) };
        assert_eq!(stray.object_name(&names), None);
    }

    proptest! {
        #[test]
        fn prop_record_count_or_malformed(len in 0usize..(EXPORT_RECORD_SIZE * 6)) {
            let buf = vec![0xA5u8; len];
            match decode_exports(&buf) {
                Ok(records) => {
                    prop_assert_eq!(len % EXPORT_RECORD_SIZE, 0);
                    prop_assert_eq!(records.len(), len / EXPORT_RECORD_SIZE);
                }
                Err(ContainerError::MalformedTable { .. }) => {
                    prop_assert_ne!(len % EXPORT_RECORD_SIZE, 0);
                }
                Err(e) => prop_assert!(false, "unexpected error {e}"),
            }
        }
    }
}
