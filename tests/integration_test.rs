use std::fs::File;
use std::io::{BufReader, Cursor, Write};

use tempfile::NamedTempFile;
use ucasset::codec::{CodecError, CodecRegistry};
use ucasset::container::{self, ContainerError, ContainerResource, DecodeOptions};
use ucasset::export::{ExportRecord, OTHER_PROPERTIES_LEN};
use ucasset::header::{ContainerHeader, EXPECTED_PACKAGE_FLAGS};
use ucasset::names::Name;

/// Header-only container: one name "Foo" padded to 10 bytes, no exports,
/// no dependency packages.
fn foo_container() -> Vec<u8> {
    let header = ContainerHeader {
        repeat: [7, 7],
        package_flags: EXPECTED_PACKAGE_FLAGS,
        total_header_size: 0,
        names_dir_offset: 64,
        names_dir_length: 10,
        names_hash_offset: 75,
        names_hash_length: 0,
        import_objects_offset: 75,
        export_objects_offset: 75,
        export_meta_offset: 75,
        dependency_packages_offset: 75,
        dependency_packages_size: 0,
    };
    let mut bytes = header.to_bytes().to_vec();
    bytes.push(0x00);
    bytes.extend_from_slice(&[0x03, b'F', b'o', b'o', 0x00]);
    bytes.resize(75, 0);
    bytes
}

fn textured_container() -> (ContainerResource, Vec<u8>) {
    let mut props = [0u8; OTHER_PROPERTIES_LEN];
    props[..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    let mut res = ContainerResource {
        header: ContainerHeader {
            repeat: [0x1234, 0x1234],
            package_flags: EXPECTED_PACKAGE_FLAGS,
            total_header_size: 0x4A1,
            ..Default::default()
        },
        names: vec![
            "/Game/Textures/T_Rock".into(),
            "T_Rock".into(),
            "Texture2D".into(),
            "/Script/Engine".into(),
        ],
        exports: vec![ExportRecord {
            serial_offset: 0x4A1,
            serial_size: 32,
            object_name_index: 1,
            class_name_index: 2,
            other_properties: props,
        }],
        import_objects: (0u8..40).collect(),
        export_meta: vec![0x11; 32],
        dependency_packages: vec![0u8; 4],
    };
    res.relayout().unwrap();
    let mut bytes = res.to_bytes().unwrap();
    bytes.extend((0u8..32).map(|b| b.wrapping_mul(3)));
    (res, bytes)
}

#[test]
fn test_foo_container_end_to_end() {
    let bytes = foo_container();
    let decoded = container::decode(&mut Cursor::new(&bytes), &DecodeOptions::default()).unwrap();
    assert_eq!(decoded.resource.names, vec![Name::from("Foo")]);
    assert!(decoded.resource.exports.is_empty());
    assert_eq!(decoded.payload_start, decoded.resource.header.dependency_packages_offset as u64);
    assert_eq!(decoded.offset_correction(), 0);
}

#[test]
fn test_decode_from_file_and_extract() {
    let (res, bytes) = textured_container();
    let mut tmp = NamedTempFile::new().unwrap();
    tmp.write_all(&bytes).unwrap();
    tmp.flush().unwrap();

    let decoded = container::open(tmp.path(), &DecodeOptions::default()).unwrap();
    assert_eq!(decoded.resource, res);

    let export = &decoded.resource.exports[0];
    assert_eq!(export.object_name(&decoded.resource.names).unwrap(), "T_Rock");
    assert_eq!(export.class_name(&decoded.resource.names).unwrap(), "Texture2D");
    assert_eq!(&export.other_properties[..4], &[0xDE, 0xAD, 0xBE, 0xEF]);

    let ranges = decoded.export_ranges();
    assert_eq!(ranges.len(), 1);
    assert_eq!((ranges[0].start, ranges[0].end), (0, 32));
    assert_eq!(
        decoded.offset_correction(),
        0x4A1 - decoded.payload_start as i64
    );

    // The source can be reopened independently of the decoded resource.
    let mut src = BufReader::new(File::open(tmp.path()).unwrap());
    let payload = decoded.read_export_payload(&mut src, 0).unwrap();
    let expected: Vec<u8> = (0u8..32).map(|b| b.wrapping_mul(3)).collect();
    assert_eq!(payload, expected);
    assert_eq!(decoded.read_payload(&mut src).unwrap(), expected);
}

#[test]
fn test_reencode_matches_source_regions() {
    let (_, bytes) = textured_container();
    let decoded = container::decode(&mut Cursor::new(&bytes), &DecodeOptions::default()).unwrap();
    let reencoded = decoded.resource.to_bytes().unwrap();
    assert_eq!(&reencoded[..], &bytes[..decoded.payload_start as usize]);
}

#[test]
fn test_edit_and_relayout() {
    let (res, _) = textured_container();
    let mut edited = res.clone();
    edited.names[1] = "T_Rock_Mossy".into();
    edited.relayout().unwrap();
    let bytes = edited.to_bytes().unwrap();

    let opts = DecodeOptions { strict_header: true, verify_name_hashes: true };
    let decoded = container::decode(&mut Cursor::new(&bytes), &opts).unwrap();
    assert_eq!(decoded.resource.names[1], "T_Rock_Mossy");
    assert_eq!(decoded.resource.exports, res.exports);
    assert_eq!(decoded.resource.import_objects, res.import_objects);
    assert_eq!(decoded.resource.export_meta, res.export_meta);
    assert_eq!(decoded.resource.dependency_packages, res.dependency_packages);
    // Payload start moved by six bytes; the first export still lands at 0.
    assert_eq!(decoded.export_ranges()[0].start, 0);
}

#[test]
fn test_latin1_name_reencodes_byte_for_byte() {
    let (mut res, _) = textured_container();
    res.names[1] = Name::from(&b"T_Ro\xE7k"[..]);
    res.relayout().unwrap();
    let bytes = res.to_bytes().unwrap();

    let opts = DecodeOptions { strict_header: true, verify_name_hashes: true };
    let decoded = container::decode(&mut Cursor::new(&bytes), &opts).unwrap();
    assert_eq!(decoded.resource.names[1].as_bytes(), b"T_Ro\xE7k");
    assert_eq!(decoded.resource.to_bytes().unwrap(), bytes);
}

#[test]
fn test_truncated_names_directory() {
    let mut bytes = foo_container();
    bytes.truncate(70);
    assert!(matches!(
        container::decode(&mut Cursor::new(&bytes), &DecodeOptions::default()),
        Err(ContainerError::TruncatedInput { region: "names directory", expected: 10 })
    ));
}

#[test]
fn test_payload_decompressed_through_registry() {
    let registry = CodecRegistry::new();
    let raw = b"serialized export properties ".repeat(8);
    for method in ["none", "zlib", "lz4"] {
        let packed = registry.compress(method, &raw).unwrap();
        assert_eq!(registry.decompress(method, &packed, raw.len()).unwrap(), raw, "{method}");
    }
    assert!(matches!(
        registry.decompress("brotli", &raw, raw.len()),
        Err(CodecError::UnknownCodec(_))
    ));
}

#[test]
fn test_registry_shared_across_threads() {
    let registry = std::sync::Arc::new(CodecRegistry::new());
    let handles: Vec<_> = (0..4u8)
        .map(|i| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                let data = vec![i; 4096];
                let packed = registry.compress("zlib", &data).unwrap();
                registry.decompress("zlib", &packed, data.len()).unwrap() == data
            })
        })
        .collect();
    for h in handles {
        assert!(h.join().unwrap());
    }
}
