//! Container decoder: header → names → imports → exports → meta → deps.
//!
//! ```no_run
//! use ucasset::container::{self, DecodeOptions};
//!
//! let decoded = container::open("Hero.uasset", &DecodeOptions::default())?;
//! for range in decoded.export_ranges() {
//!     println!("export {} at {}..{}", range.index, range.start, range.end);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Reads
//! Every region is read with the length the header declares, never one
//! inferred from what follows.  A short read is [`ContainerError::TruncatedInput`]
//! and aborts the decode; there is no partial result.
//!
//! # Ownership
//! Each region is copied into buffers owned by the returned
//! [`ContainerResource`]; the source can be dropped or reused right after.
//!
//! # Offset correction
//! Export serial offsets point into the original uncombined layout.  The
//! first export's serial offset is pinned to the start of the payload region
//! (`dependency_packages_offset + dependency_packages_size`) and the same
//! shift applies to every other export.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::export::{self, decode_exports, encode_exports, ExportRecord};
use crate::header::{ContainerHeader, EXPECTED_PACKAGE_FLAGS, HEADER_SIZE};
use crate::names::{decode_names, encode_names, Name, NameHashTable, CITYHASH64_ALGORITHM_ID};

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Truncated input: {region} needs {expected} bytes")]
    TruncatedInput { region: &'static str, expected: u64 },
    #[error("Malformed {table}: {reason}")]
    MalformedTable { table: &'static str, reason: String },
    /// A region's end offset lies before its start offset.
    #[error("Invalid layout: {end_field} ({end}) precedes {start_field} ({start})")]
    InvalidLayout {
        start_field: &'static str,
        start: u64,
        end_field: &'static str,
        end: u64,
    },
    /// Only raised with [`DecodeOptions::strict_header`].
    #[error("Header anomaly: {0}")]
    HeaderAnomaly(String),
    #[error("Export index {index} out of range ({count} exports)")]
    NoSuchExport { index: usize, count: usize },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── DecodeOptions ────────────────────────────────────────────────────────────

/// Configuration for [`decode`].
#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    /// Reject headers whose `repeat` pair differs or whose `package_flags`
    /// is not `0x80000000`.  Off by default: such headers are logged and
    /// decoded anyway.
    pub strict_header: bool,
    /// Decode the stored name hash table and fail on any mismatch.
    pub verify_name_hashes: bool,
}

// ── Resource ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerResource {
    pub header: ContainerHeader,
    pub names: Vec<Name>,
    pub exports: Vec<ExportRecord>,
    pub import_objects: Vec<u8>,
    pub export_meta: Vec<u8>,
    pub dependency_packages: Vec<u8>,
}

/// One export's payload bytes, relative to the start of the payload region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExportRange {
    pub index: usize,
    pub start: i64,
    pub end: i64,
}

impl ExportRange {
    /// `None` when `end - start` does not fit in an `i64`.
    pub fn len(&self) -> Option<u64> {
        self.end.checked_sub(self.start).map(|n| n.max(0) as u64)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl ContainerResource {
    pub fn name(&self, index: u64) -> Option<&Name> {
        export::lookup(&self.names, index)
    }

    /// `first_export.serial_offset - payload_start`, or 0 with no exports.
    pub fn offset_correction(&self, payload_start: u64) -> i64 {
        match self.exports.first() {
            Some(first) => (first.serial_offset as i64).wrapping_sub(payload_start as i64),
            None => 0,
        }
    }

    /// Corrected range of every export within the payload region.
    pub fn export_ranges(&self, payload_start: u64) -> Vec<ExportRange> {
        let correction = self.offset_correction(payload_start);
        self.exports
            .iter()
            .enumerate()
            .map(|(index, e)| {
                let physical = (e.serial_offset as i64).wrapping_sub(correction);
                let start = physical.wrapping_sub(payload_start as i64);
                ExportRange {
                    index,
                    start,
                    end: start.wrapping_add(e.serial_size as i64),
                }
            })
            .collect()
    }

    /// Recompute every header offset for the canonical region order
    /// (header, null byte, names, hashes, imports, exports, meta, deps),
    /// regenerating the name hash table.  Export serial offsets are left
    /// alone; the offset correction absorbs the move.
    pub fn relayout(&mut self) -> Result<(), ContainerError> {
        let names_len = encode_names(&self.names)?.len() as u64;
        let hashes_len = if self.names.is_empty() {
            0
        } else {
            NameHashTable::build(&self.names).encode().len() as u64
        };
        let exports_len = encode_exports(&self.exports).len() as u64;

        let mut cursor = HEADER_SIZE as u64;
        let names_dir_offset = cursor;
        cursor += 1 + names_len;
        let names_hash_offset = cursor;
        cursor += hashes_len;
        let import_objects_offset = cursor;
        cursor += self.import_objects.len() as u64;
        let export_objects_offset = cursor;
        cursor += exports_len;
        let export_meta_offset = cursor;
        cursor += self.export_meta.len() as u64;
        let dependency_packages_offset = cursor;

        let h = &mut self.header;
        h.names_dir_offset = to_u32(names_dir_offset, "names directory offset")?;
        h.names_dir_length = to_u32(names_len, "names directory length")?;
        h.names_hash_offset = to_u32(names_hash_offset, "names hash offset")?;
        h.names_hash_length = to_u32(hashes_len, "names hash length")?;
        h.import_objects_offset = to_u32(import_objects_offset, "import objects offset")?;
        h.export_objects_offset = to_u32(export_objects_offset, "export objects offset")?;
        h.export_meta_offset = to_u32(export_meta_offset, "export meta offset")?;
        h.dependency_packages_offset =
            to_u32(dependency_packages_offset, "dependency packages offset")?;
        h.dependency_packages_size = self.dependency_packages.len() as u64;
        Ok(())
    }

    /// Lay every region out at the offsets the header declares.  Gaps are
    /// zero-filled.  The header must agree with the region contents; call
    /// [`relayout`](Self::relayout) after edits that change sizes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ContainerError> {
        let h = &self.header;
        let names = encode_names(&self.names)?;
        if names.len() > h.names_dir_length as usize {
            return Err(ContainerError::MalformedTable {
                table: "names directory",
                reason: format!(
                    "{} encoded bytes exceed declared length {}",
                    names.len(),
                    h.names_dir_length
                ),
            });
        }
        let exports = encode_exports(&self.exports);
        let import_span = span(h.import_objects_offset, "import objects offset", h.export_objects_offset, "export objects offset")?;
        let export_span = span(h.export_objects_offset, "export objects offset", h.export_meta_offset, "export meta offset")?;
        let meta_span = span(h.export_meta_offset, "export meta offset", h.dependency_packages_offset, "dependency packages offset")?;
        expect_len("import objects", import_span, self.import_objects.len())?;
        expect_len("export objects", export_span, exports.len())?;
        expect_len("export meta", meta_span, self.export_meta.len())?;
        expect_len(
            "dependency packages",
            h.dependency_packages_size,
            self.dependency_packages.len(),
        )?;

        let mut out = Vec::new();
        place(&mut out, 0, &h.to_bytes());
        // names_dir_offset itself holds the leading null byte.
        place(&mut out, h.names_dir_offset as u64, &[0u8]);
        place(&mut out, h.names_dir_offset as u64 + 1, &names);
        let dir_end = h.names_dir_offset as usize + 1 + h.names_dir_length as usize;
        if out.len() < dir_end {
            out.resize(dir_end, 0);
        }
        if h.names_hash_length > 0 {
            let table = NameHashTable::build(&self.names).encode();
            expect_len("names hashes", h.names_hash_length as u64, table.len())?;
            place(&mut out, h.names_hash_offset as u64, &table);
        }
        place(&mut out, h.import_objects_offset as u64, &self.import_objects);
        place(&mut out, h.export_objects_offset as u64, &exports);
        place(&mut out, h.export_meta_offset as u64, &self.export_meta);
        place(&mut out, h.dependency_packages_offset as u64, &self.dependency_packages);
        let payload_start = h.payload_region_start() as usize;
        if out.len() < payload_start {
            out.resize(payload_start, 0);
        }
        Ok(out)
    }
}

fn to_u32(v: u64, field: &'static str) -> Result<u32, ContainerError> {
    u32::try_from(v).map_err(|_| ContainerError::MalformedTable {
        table: "header",
        reason: format!("{field} {v} does not fit in 32 bits"),
    })
}

fn span(
    start: u32,
    start_field: &'static str,
    end: u32,
    end_field: &'static str,
) -> Result<u64, ContainerError> {
    end.checked_sub(start)
        .map(u64::from)
        .ok_or(ContainerError::InvalidLayout {
            start_field,
            start: start as u64,
            end_field,
            end: end as u64,
        })
}

fn expect_len(region: &'static str, declared: u64, actual: usize) -> Result<(), ContainerError> {
    if declared != actual as u64 {
        return Err(ContainerError::MalformedTable {
            table: region,
            reason: format!("header declares {declared} bytes but the region holds {actual}"),
        });
    }
    Ok(())
}

fn place(out: &mut Vec<u8>, offset: u64, bytes: &[u8]) {
    let start = offset as usize;
    let end = start + bytes.len();
    if out.len() < end {
        out.resize(end, 0);
    }
    out[start..end].copy_from_slice(bytes);
}

// ── DecodedContainer ─────────────────────────────────────────────────────────

/// Result of a successful decode.
#[derive(Debug, Clone)]
pub struct DecodedContainer {
    pub resource: ContainerResource,
    /// Payload region start, relative to the container start.
    pub payload_start: u64,
    /// Source position the container started at.
    pub base: u64,
}

impl DecodedContainer {
    pub fn offset_correction(&self) -> i64 {
        self.resource.offset_correction(self.payload_start)
    }

    pub fn export_ranges(&self) -> Vec<ExportRange> {
        self.resource.export_ranges(self.payload_start)
    }

    /// Everything from the payload start to the end of `source`, untouched.
    pub fn read_payload<R: Read + Seek>(&self, source: &mut R) -> Result<Vec<u8>, ContainerError> {
        source.seek(SeekFrom::Start(self.base + self.payload_start))?;
        let mut out = Vec::new();
        source.read_to_end(&mut out)?;
        Ok(out)
    }

    /// The payload bytes of export `index`.
    pub fn read_export_payload<R: Read + Seek>(
        &self,
        source: &mut R,
        index: usize,
    ) -> Result<Vec<u8>, ContainerError> {
        let count = self.resource.exports.len();
        let range = self
            .export_ranges()
            .get(index)
            .copied()
            .ok_or(ContainerError::NoSuchExport { index, count })?;
        if range.start < 0 {
            return Err(ContainerError::MalformedTable {
                table: "export objects",
                reason: format!("export {index} starts before the payload region"),
            });
        }
        let bad_range = || ContainerError::MalformedTable {
            table: "export objects",
            reason: format!(
                "export {index} range {} - {} is not addressable",
                range.start, range.end
            ),
        };
        let len = range.len().ok_or_else(bad_range)?;
        let offset = self
            .payload_start
            .checked_add(range.start as u64)
            .and_then(|o| o.checked_add(self.base))
            .ok_or_else(bad_range)?;
        read_region(source, offset, len, "export payload")
    }

    /// Stored name hash table, `None` when the header declares none.
    pub fn read_name_hashes<R: Read + Seek>(
        &self,
        source: &mut R,
    ) -> Result<Option<NameHashTable>, ContainerError> {
        let h = &self.resource.header;
        let buf = read_region(
            source,
            self.base + h.names_hash_offset as u64,
            h.names_hash_length as u64,
            "names hashes",
        )?;
        NameHashTable::decode(&buf)
    }
}

// ── Decoder ──────────────────────────────────────────────────────────────────

pub fn open<P: AsRef<Path>>(path: P, opts: &DecodeOptions) -> Result<DecodedContainer, ContainerError> {
    let mut reader = BufReader::new(File::open(path.as_ref())?);
    decode(&mut reader, opts)
}

/// Decode the container that starts at the current position of `source`.
pub fn decode<R: Read + Seek>(
    source: &mut R,
    opts: &DecodeOptions,
) -> Result<DecodedContainer, ContainerError> {
    let base = source.stream_position()?;

    let mut raw = [0u8; HEADER_SIZE];
    source.read_exact(&mut raw).map_err(|e| truncated(e, "header", HEADER_SIZE as u64))?;
    let header = ContainerHeader::read(&raw[..])?;
    check_header(&header, opts)?;

    let names_buf = read_region(
        source,
        base + header.names_dir_offset as u64 + 1,
        header.names_dir_length as u64,
        "names directory",
    )?;
    let names = decode_names(&names_buf)?;
    log::debug!("names directory: {} entries", names.len());

    let import_len = span(
        header.import_objects_offset, "import objects offset",
        header.export_objects_offset, "export objects offset",
    )?;
    let import_objects = read_region(
        source,
        base + header.import_objects_offset as u64,
        import_len,
        "import objects",
    )?;

    let export_len = span(
        header.export_objects_offset, "export objects offset",
        header.export_meta_offset, "export meta offset",
    )?;
    let export_buf = read_region(
        source,
        base + header.export_objects_offset as u64,
        export_len,
        "export objects",
    )?;
    let exports = decode_exports(&export_buf)?;
    log::debug!("export table: {} records", exports.len());

    let meta_len = span(
        header.export_meta_offset, "export meta offset",
        header.dependency_packages_offset, "dependency packages offset",
    )?;
    let export_meta = read_region(
        source,
        base + header.export_meta_offset as u64,
        meta_len,
        "export meta",
    )?;

    let dependency_packages = read_region(
        source,
        base + header.dependency_packages_offset as u64,
        header.dependency_packages_size,
        "dependency packages",
    )?;

    let payload_start = header.payload_region_start();
    let decoded = DecodedContainer {
        resource: ContainerResource {
            header,
            names,
            exports,
            import_objects,
            export_meta,
            dependency_packages,
        },
        payload_start,
        base,
    };

    if opts.verify_name_hashes {
        verify_name_hashes(source, &decoded)?;
    }

    if log::log_enabled!(log::Level::Trace) {
        log::trace!("offset correction {}", decoded.offset_correction());
        for r in decoded.export_ranges() {
            log::trace!("export {} range {} - {}", r.index, r.start, r.end);
        }
    }

    Ok(decoded)
}

fn check_header(header: &ContainerHeader, opts: &DecodeOptions) -> Result<(), ContainerError> {
    let mut anomalies = Vec::new();
    if !header.repeat_matches() {
        anomalies.push(format!(
            "repeat values differ ({:#x} != {:#x})",
            header.repeat[0], header.repeat[1]
        ));
    }
    if !header.has_expected_flags() {
        anomalies.push(format!(
            "package flags {:#010x}, expected {EXPECTED_PACKAGE_FLAGS:#010x}",
            header.package_flags
        ));
    }
    if anomalies.is_empty() {
        return Ok(());
    }
    if opts.strict_header {
        return Err(ContainerError::HeaderAnomaly(anomalies.join("; ")));
    }
    for a in &anomalies {
        log::warn!("header anomaly: {a}");
    }
    Ok(())
}

fn verify_name_hashes<R: Read + Seek>(
    source: &mut R,
    decoded: &DecodedContainer,
) -> Result<(), ContainerError> {
    let Some(table) = decoded.read_name_hashes(source)? else {
        return Ok(());
    };
    if table.algorithm_id != CITYHASH64_ALGORITHM_ID {
        log::warn!(
            "unknown name hash algorithm {:#x}, skipping verification",
            table.algorithm_id
        );
        return Ok(());
    }
    let bad = table.mismatches(&decoded.resource.names);
    if let Some(first) = bad.first() {
        return Err(ContainerError::MalformedTable {
            table: "names hashes",
            reason: format!(
                "{} stored hash(es) disagree, first at name {first} ('{}')",
                bad.len(),
                decoded.resource.names[*first]
            ),
        });
    }
    Ok(())
}

/// Read exactly `len` bytes at `offset`.  Reads through `take` so a bogus
/// length cannot force a huge allocation before the short read is noticed.
fn read_region<R: Read + Seek>(
    source: &mut R,
    offset: u64,
    len: u64,
    region: &'static str,
) -> Result<Vec<u8>, ContainerError> {
    source.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::new();
    source.by_ref().take(len).read_to_end(&mut buf)?;
    if (buf.len() as u64) != len {
        return Err(ContainerError::TruncatedInput { region, expected: len });
    }
    log::debug!("{region}: {len} bytes at {offset:#x}");
    Ok(buf)
}

fn truncated(e: io::Error, region: &'static str, expected: u64) -> ContainerError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ContainerError::TruncatedInput { region, expected }
    } else {
        ContainerError::Io(e)
    }
}
