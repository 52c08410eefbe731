//! Fixed 64-byte container header.
//!
//! Layout (little-endian, no padding):
//!
//! | offset | size | field                        |
//! |--------|------|------------------------------|
//! |  0     | 16   | `repeat` (u64 × 2)           |
//! | 16     |  4   | `package_flags`              |
//! | 20     |  4   | `total_header_size`          |
//! | 24     |  8   | names directory offset/len   |
//! | 32     |  8   | names hash offset/len        |
//! | 40     |  4   | `import_objects_offset`      |
//! | 44     |  4   | `export_objects_offset`      |
//! | 48     |  4   | `export_meta_offset`         |
//! | 52     |  4   | `dependency_packages_offset` |
//! | 56     |  8   | `dependency_packages_size`   |

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{self, Read, Write};

pub const HEADER_SIZE: usize = 64;

/// Value `package_flags` carries in every container seen so far.
pub const EXPECTED_PACKAGE_FLAGS: u32 = 0x8000_0000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContainerHeader {
    /// Same number stored twice.
    pub repeat: [u64; 2],
    pub package_flags: u32,
    /// Header size of the uncombined original. Informational only.
    pub total_header_size: u32,
    /// Points at a null byte; the table itself starts one byte later.
    pub names_dir_offset: u32,
    pub names_dir_length: u32,
    /// First stored u64 is the hash algorithm id.
    pub names_hash_offset: u32,
    pub names_hash_length: u32,
    pub import_objects_offset: u32,
    pub export_objects_offset: u32,
    /// Also the end of the export record table.
    pub export_meta_offset: u32,
    pub dependency_packages_offset: u32,
    pub dependency_packages_size: u64,
}

impl ContainerHeader {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.repeat[0])?;
        writer.write_u64::<LittleEndian>(self.repeat[1])?;
        writer.write_u32::<LittleEndian>(self.package_flags)?;
        writer.write_u32::<LittleEndian>(self.total_header_size)?;
        writer.write_u32::<LittleEndian>(self.names_dir_offset)?;
        writer.write_u32::<LittleEndian>(self.names_dir_length)?;
        writer.write_u32::<LittleEndian>(self.names_hash_offset)?;
        writer.write_u32::<LittleEndian>(self.names_hash_length)?;
        writer.write_u32::<LittleEndian>(self.import_objects_offset)?;
        writer.write_u32::<LittleEndian>(self.export_objects_offset)?;
        writer.write_u32::<LittleEndian>(self.export_meta_offset)?;
        writer.write_u32::<LittleEndian>(self.dependency_packages_offset)?;
        writer.write_u64::<LittleEndian>(self.dependency_packages_size)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        Ok(Self {
            repeat: [
                reader.read_u64::<LittleEndian>()?,
                reader.read_u64::<LittleEndian>()?,
            ],
            package_flags: reader.read_u32::<LittleEndian>()?,
            total_header_size: reader.read_u32::<LittleEndian>()?,
            names_dir_offset: reader.read_u32::<LittleEndian>()?,
            names_dir_length: reader.read_u32::<LittleEndian>()?,
            names_hash_offset: reader.read_u32::<LittleEndian>()?,
            names_hash_length: reader.read_u32::<LittleEndian>()?,
            import_objects_offset: reader.read_u32::<LittleEndian>()?,
            export_objects_offset: reader.read_u32::<LittleEndian>()?,
            export_meta_offset: reader.read_u32::<LittleEndian>()?,
            dependency_packages_offset: reader.read_u32::<LittleEndian>()?,
            dependency_packages_size: reader.read_u64::<LittleEndian>()?,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        // Writing into a fixed slice of exactly HEADER_SIZE cannot run short.
        let _ = self.write(&mut out[..]);
        out
    }

    /// Absolute offset (relative to the container start) where the payload begins.
    pub fn payload_region_start(&self) -> u64 {
        self.dependency_packages_offset as u64 + self.dependency_packages_size
    }

    pub fn repeat_matches(&self) -> bool {
        self.repeat[0] == self.repeat[1]
    }

    pub fn has_expected_flags(&self) -> bool {
        self.package_flags == EXPECTED_PACKAGE_FLAGS
    }
}
