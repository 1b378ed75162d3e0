//! End-to-end container tests through the public API: model -> bytes ->
//! model -> bytes fidelity, the known-layout single-file scenario, the
//! 4-byte decompression quirk, and a pack -> save -> open -> unpack flow.

use std::fs;
use std::io::Cursor;

use bstr::ByteSlice;
use tes_bsa_core::bsa::{ArchiveFlags, BsaArchive, BsaFile};
use tes_bsa_core::compression::CompressionSettings;
use tes_bsa_core::error::BsaError;
use tes_bsa_core::hash;

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())
}

fn build_archive(flags: ArchiveFlags, settings: &CompressionSettings) -> BsaArchive {
    let mut archive = BsaArchive::create(flags);
    for (folder, name, data) in [
        (&b"meshes\\dwemer"[..], &b"gearwall01.nif"[..], &b"gear wall geometry, gear wall geometry"[..]),
        (&b"meshes\\dwemer"[..], &b"pipe01.nif"[..], &b"pipe geometry"[..]),
        (&b"sound\\fx\\drs"[..], &b"doorstone.wav"[..], &b"stone door rumble samples"[..]),
        (&b"textures\\dwemer"[..], &b"gearwall01.dds"[..], &b"texel rows for the gear wall"[..]),
    ] {
        archive
            .add_file(
                folder.as_bstr(),
                BsaFile::from_raw(name.as_bstr(), data.to_vec(), settings).unwrap(),
            )
            .unwrap();
    }
    archive
}

fn serialize(archive: &BsaArchive, settings: &CompressionSettings) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    archive.write_to(&mut cursor, false, settings).unwrap();
    cursor.into_inner()
}

#[test]
fn bytes_round_trip_through_the_model() {
    let cases = [
        (
            ArchiveFlags::NAMED_DIRECTORIES | ArchiveFlags::NAMED_FILES,
            CompressionSettings::new(),
        ),
        (
            ArchiveFlags::NAMED_DIRECTORIES
                | ArchiveFlags::NAMED_FILES
                | ArchiveFlags::DEFAULT_COMPRESSED
                | ArchiveFlags::BSTRING_PREFIXED,
            CompressionSettings::new().with_default_compressed(true),
        ),
        (ArchiveFlags::empty(), CompressionSettings::new()),
    ];

    for (flags, settings) in cases {
        let first = serialize(&build_archive(flags, &settings), &settings);
        let reread = BsaArchive::from_bytes(first.clone()).unwrap();
        let second = serialize(&reread, &settings);
        assert_eq!(first, second, "flags {:?}", flags);
    }
}

#[test]
fn reread_archives_preserve_names_and_content() {
    let settings = CompressionSettings::new().with_default_compressed(true);
    let flags = ArchiveFlags::NAMED_DIRECTORIES
        | ArchiveFlags::NAMED_FILES
        | ArchiveFlags::DEFAULT_COMPRESSED;
    let bytes = serialize(&build_archive(flags, &settings), &settings);

    let archive = BsaArchive::from_bytes(bytes).unwrap();
    assert_eq!(archive.folder_count(), 3);
    assert_eq!(archive.file_count(), 4);

    let file = archive
        .file(b"Meshes/Dwemer".as_bstr(), b"GEARWALL01.NIF".as_bstr())
        .unwrap();
    assert!(file.compressed());
    assert_eq!(
        file.content(true, false, &settings).unwrap(),
        b"gear wall geometry, gear wall geometry"
    );

    // Iteration comes back in ascending hash order.
    let hashes: Vec<u64> = archive.folders().map(|f| f.hash().value()).collect();
    let mut sorted = hashes.clone();
    sorted.sort_unstable();
    assert_eq!(hashes, sorted);
}

#[test]
fn single_file_archive_has_the_documented_layout() {
    let settings = CompressionSettings::new();
    let mut archive =
        BsaArchive::create(ArchiveFlags::NAMED_DIRECTORIES | ArchiveFlags::NAMED_FILES);
    archive
        .add_file(
            b"sound\\fx".as_bstr(),
            BsaFile::from_raw(b"click.wav".as_bstr(), b"0123456789".to_vec(), &settings).unwrap(),
        )
        .unwrap();
    let bytes = serialize(&archive, &settings);

    assert_eq!(&bytes[0..4], b"BSA\0");
    assert_eq!(read_u32(&bytes, 4), 0x68);
    assert_eq!(read_u32(&bytes, 8), 36);
    assert_eq!(read_u32(&bytes, 16), 1, "folder count");
    assert_eq!(read_u32(&bytes, 20), 1, "file count");
    assert_eq!(read_u32(&bytes, 24), 9, "total folder name length");
    assert_eq!(read_u32(&bytes, 28), 10, "total file name length");
    assert_eq!(read_u32(&bytes, 32), 1 << 3, "wav file flag");

    // Folder record: known hash, one file, offset shifted by the name table.
    assert_eq!(read_u64(&bytes, 36), 0x04BC_422C_742C_696C);
    assert_eq!(read_u32(&bytes, 44), 1);
    assert_eq!(read_u32(&bytes, 48), 62);

    // File record after the BZString folder name.
    let file_hash = read_u64(&bytes, 62);
    assert_eq!(file_hash & 0xFFFF_FFFF, 0xE305_636B);
    assert_eq!(file_hash, hash::hash_file(b"click.wav".as_bstr()).unwrap().value());
    assert_eq!(read_u32(&bytes, 70), 10, "stored size, no flip bit");
    let data_offset = read_u32(&bytes, 74) as usize;
    assert_eq!(&bytes[data_offset..data_offset + 10], b"0123456789");
}

// Raw deflate of `payload` as a single stored block, so tests can frame
// streams without running a compressor.
fn stored_deflate(payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u16;
    let mut block = vec![0x01];
    block.extend_from_slice(&len.to_le_bytes());
    block.extend_from_slice(&(!len).to_le_bytes());
    block.extend_from_slice(payload);
    block
}

// Hand-built single-file archive (no name tables) whose one compressed
// entry carries `stored` and claims `original_size`.
fn nameless_compressed_archive(stored: &[u8], original_size: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"BSA\0");
    bytes.extend_from_slice(&0x68u32.to_le_bytes());
    bytes.extend_from_slice(&36u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    // Folder record, offset = 52 (its file-record block).
    bytes.extend_from_slice(&0x1111u64.to_le_bytes());
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.extend_from_slice(&52u32.to_le_bytes());
    // File record, bit 30 set: compressed against an uncompressed default.
    bytes.extend_from_slice(&0x2222u64.to_le_bytes());
    bytes.extend_from_slice(&(stored.len() as u32 | 1 << 30).to_le_bytes());
    bytes.extend_from_slice(&68u32.to_le_bytes());
    // Data block: original size, then the stored stream.
    bytes.extend_from_slice(&original_size.to_le_bytes());
    bytes.extend_from_slice(stored);
    bytes
}

#[test]
fn four_byte_originals_skip_the_frame_check() {
    let mut stored = vec![0xDE, 0xAD];
    stored.extend_from_slice(&stored_deflate(b"abcd"));

    let archive = BsaArchive::from_bytes(nameless_compressed_archive(&stored, 4)).unwrap();
    let file = archive.folders().next().unwrap().files().next().unwrap();
    assert!(file.compressed());
    assert!(!file.named());
    assert_eq!(
        file.content(true, false, &CompressionSettings::new()).unwrap(),
        b"abcd"
    );
}

#[test]
fn invalid_frames_fail_for_other_sizes() {
    let mut stored = vec![0xDE, 0xAD];
    stored.extend_from_slice(&stored_deflate(b"abcde"));

    let archive = BsaArchive::from_bytes(nameless_compressed_archive(&stored, 5)).unwrap();
    let file = archive.folders().next().unwrap().files().next().unwrap();
    assert!(matches!(
        file.content(true, false, &CompressionSettings::new()),
        Err(BsaError::CorruptHeader { value: 0xDEAD })
    ));
}

#[test]
fn pack_save_open_unpack_flow() {
    let source = tempfile::tempdir().unwrap();
    for (rel, data) in [
        ("meshes/dwemer/gearwall01.nif", &b"gear wall geometry, gear wall geometry"[..]),
        ("sound/fx/drs/doorstone.wav", &b"stone door rumble samples"[..]),
        ("textures/dwemer/gearwall01.dds", &b"texel rows for the gear wall"[..]),
    ] {
        let path = source.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    let settings = CompressionSettings::new().with_default_compressed(true);
    let flags = ArchiveFlags::NAMED_DIRECTORIES
        | ArchiveFlags::NAMED_FILES
        | ArchiveFlags::DEFAULT_COMPRESSED;
    let (archive, report) = tes_bsa_core::pack::PackBuilder::new(source.path())
        .archive_flags(flags)
        .settings(settings.clone())
        .run()
        .unwrap();
    assert_eq!(report.packed, 3);

    let out = tempfile::tempdir().unwrap();
    let archive_path = out.path().join("dwemer.bsa");
    archive.save(&archive_path, false, &settings).unwrap();

    let reopened = BsaArchive::open(&archive_path).unwrap();
    assert_eq!(reopened.file_count(), 3);
    let info = reopened.info();
    assert!(info.default_compressed);
    assert_eq!(info.file_count, 3);

    let target = out.path().join("tree");
    let unpack_report = reopened.unpack(&target).unwrap();
    assert_eq!(unpack_report.extracted, 3);
    assert_eq!(
        fs::read(target.join("meshes/dwemer/gearwall01.nif")).unwrap(),
        b"gear wall geometry, gear wall geometry"
    );
    assert_eq!(
        fs::read(target.join("sound/fx/drs/doorstone.wav")).unwrap(),
        b"stone door rumble samples"
    );
}
