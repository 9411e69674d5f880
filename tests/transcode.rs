use pretty_assertions::assert_eq;
use std::io::{Read, Write};
use std::sync::Arc;

use rezip::zip::{CompressionMethod, EntryDescriptor};
use rezip::{
    ArchiveOptimizer, CompressorConfig, DeflateCompressor, Error, MemoryReader,
    NestedArchiveReencoder, Outcome, TranscodePolicy, ZipFileEntry, ZipParser, ZipWriter,
    transcode,
};

const WORDS: [&str; 16] = [
    "archive", "entry", "deflate", "stored", "header", "central", "directory", "comment",
    "extra", "field", "nested", "inflate", "window", "block", "huffman", "tree",
];

/// Word salad from a fixed LCG, so every run sees the same bytes
fn text(len: usize) -> Vec<u8> {
    let mut state = 0x2545_f491_u32;
    let mut out = Vec::with_capacity(len + 16);
    while out.len() < len {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let word = WORDS[(state >> 16) as usize % WORDS.len()];
        out.extend_from_slice(word.as_bytes());
        out.push(if state & 0x7 == 0 { b'\n' } else { b' ' });
    }
    out.truncate(len);
    out
}

fn deflated(writer: &mut ZipWriter<Vec<u8>>, descriptor: EntryDescriptor, content: &[u8]) {
    let mut entry = writer
        .start_entry(descriptor, &DeflateCompressor::default())
        .unwrap();
    entry.write_all(content).unwrap();
    entry.finish().unwrap();
}

fn inner_archive() -> Vec<u8> {
    let mut writer = ZipWriter::new(Vec::new());
    deflated(&mut writer, EntryDescriptor::new("data1.txt"), &text(250));
    deflated(&mut writer, EntryDescriptor::new("folder/data2.txt"), &text(500));
    writer.finish().unwrap()
}

/// Two text files with a comment and an extra field, two directories, a
/// stored file and a nested archive
fn scenario_archive() -> Vec<u8> {
    let mut writer = ZipWriter::new(Vec::new());

    let mut data1 = EntryDescriptor::new("data1.txt");
    data1.comment = b"comment1".to_vec();
    deflated(&mut writer, data1, &text(250));

    writer.add_stored(EntryDescriptor::new("folder/"), b"").unwrap();

    let mut data2 = EntryDescriptor::new("folder/data2.txt");
    data2.extra = vec![0u8; 16];
    deflated(&mut writer, data2, &text(500));

    writer
        .add_stored(EntryDescriptor::new("folder/subfolder/"), b"")
        .unwrap();
    writer
        .add_stored(EntryDescriptor::new("folder/subfolder/data3.txt"), &text(750))
        .unwrap();

    deflated(&mut writer, EntryDescriptor::new("data4.zip"), &inner_archive());
    writer.finish().unwrap()
}

fn parser(data: Vec<u8>) -> ZipParser<MemoryReader> {
    ZipParser::new(Arc::new(MemoryReader::new(data)))
}

fn read(parser: &ZipParser<MemoryReader>, entry: &ZipFileEntry) -> Vec<u8> {
    let mut content = Vec::new();
    parser
        .open_entry(entry)
        .unwrap()
        .read_to_end(&mut content)
        .unwrap();
    content
}

fn run(source: &[u8], policy: TranscodePolicy) -> Vec<u8> {
    let mut output = Vec::new();
    transcode(
        &parser(source.to_vec()),
        &mut output,
        policy,
        CompressorConfig::default(),
    )
    .unwrap();
    output
}

fn names(archive: &[u8]) -> Vec<String> {
    parser(archive.to_vec())
        .list_files()
        .unwrap()
        .into_iter()
        .map(|e| e.file_name)
        .collect()
}

#[test]
fn test_keep_all_round_trips_every_entry() {
    let source_bytes = scenario_archive();
    let output = run(&source_bytes, TranscodePolicy::keep_all());

    let source = parser(source_bytes);
    let result = parser(output);
    let before = source.list_files().unwrap();
    let after = result.list_files().unwrap();

    assert_eq!(after.len(), 6);
    assert_eq!(
        after.iter().map(|e| e.file_name.as_str()).collect::<Vec<_>>(),
        [
            "data1.txt",
            "folder/",
            "folder/data2.txt",
            "folder/subfolder/",
            "folder/subfolder/data3.txt",
            "data4.zip",
        ]
    );
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.file_name, new.file_name);
        assert_eq!(read(&source, old), read(&result, new), "{}", old.file_name);
        assert_eq!(new.compression_method, CompressionMethod::Deflate);
    }
    assert_eq!(after[0].comment, b"comment1");
    assert_eq!(after[2].extra, vec![0u8; 16]);
}

#[test]
fn test_dropping_directories_shrinks_output() {
    let source = scenario_archive();
    let all = run(&source, TranscodePolicy::keep_all());
    let without_dirs = run(
        &source,
        TranscodePolicy {
            keep_directories: false,
            ..TranscodePolicy::keep_all()
        },
    );

    let names = names(&without_dirs);
    assert_eq!(
        names,
        [
            "data1.txt",
            "folder/data2.txt",
            "folder/subfolder/data3.txt",
            "data4.zip",
        ]
    );
    assert!(names.iter().all(|name| !name.ends_with('/')));
    assert!(without_dirs.len() < all.len());
}

#[test]
fn test_dropping_extra_and_comment_shrinks_output() {
    let source = scenario_archive();
    let all = run(&source, TranscodePolicy::keep_all());

    let without_extra = run(
        &source,
        TranscodePolicy {
            keep_extra_fields: false,
            ..TranscodePolicy::keep_all()
        },
    );
    assert!(without_extra.len() < all.len());
    assert!(
        parser(without_extra)
            .list_files()
            .unwrap()
            .iter()
            .all(|e| e.extra.is_empty())
    );

    let without_comment = run(
        &source,
        TranscodePolicy {
            keep_comment: false,
            ..TranscodePolicy::keep_all()
        },
    );
    assert!(without_comment.len() < all.len());
}

#[test]
fn test_nested_archive_is_repacked_stored() {
    let source = scenario_archive();
    let all = run(&source, TranscodePolicy::keep_all());
    let repacked = run(
        &source,
        TranscodePolicy {
            keep_nested_archives: false,
            ..TranscodePolicy::keep_all()
        },
    );
    assert!(repacked.len() < all.len());

    let outer = parser(repacked);
    let entries = outer.list_files().unwrap();
    let nested = entries.iter().find(|e| e.file_name == "data4.zip").unwrap();
    let inner = parser(read(&outer, nested));

    let inner_entries = inner.list_files().unwrap();
    assert_eq!(
        inner_entries
            .iter()
            .map(|e| e.file_name.as_str())
            .collect::<Vec<_>>(),
        ["data1.txt", "folder/data2.txt"]
    );
    for (entry, expected) in inner_entries.iter().zip([text(250), text(500)]) {
        assert_eq!(entry.compression_method, CompressionMethod::Stored);
        let content = read(&inner, entry);
        assert_eq!(entry.crc32, crc32fast::hash(&content));
        assert_eq!(content, expected);
    }
}

#[test]
fn test_reencoder_recovers_inner_content() {
    let mut output = Vec::new();
    let written = NestedArchiveReencoder::new()
        .reencode(inner_archive().as_slice(), &mut output)
        .unwrap();
    assert_eq!(written, 2);

    let stored = parser(output);
    for entry in stored.list_files().unwrap() {
        assert_eq!(entry.compression_method, CompressionMethod::Stored);
        assert_eq!(entry.compressed_size, entry.uncompressed_size);
        assert_eq!(entry.crc32, crc32fast::hash(&read(&stored, &entry)));
    }
}

#[test]
fn test_archive_named_but_not_zip_fails() {
    let mut writer = ZipWriter::new(Vec::new());
    deflated(&mut writer, EntryDescriptor::new("fake.jar"), b"this is not a zip");
    let source = writer.finish().unwrap();

    let err = transcode(
        &parser(source.clone()),
        Vec::new(),
        TranscodePolicy::default(),
        CompressorConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::MalformedNestedArchive { .. }), "{err}");

    // Left alone, the same entry is just another blob
    let output = run(
        &source,
        TranscodePolicy {
            keep_nested_archives: true,
            ..TranscodePolicy::default()
        },
    );
    assert_eq!(names(&output), ["fake.jar"]);
}

#[test]
fn test_optimize_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scenario.zip");
    std::fs::write(&path, scenario_archive()).unwrap();

    let optimizer =
        ArchiveOptimizer::new(TranscodePolicy::default(), CompressorConfig::default()).unwrap();
    let outcome = optimizer.optimize(&path).unwrap();
    assert!(matches!(outcome, Outcome::Reduced { gain, .. } if gain > 0));

    let optimized = std::fs::read(&path).unwrap();
    assert_eq!(
        names(&optimized),
        [
            "data1.txt",
            "folder/data2.txt",
            "folder/subfolder/data3.txt",
            "data4.zip",
        ]
    );
    assert_eq!(
        parser(optimized).archive_comment().unwrap(),
        b"rezip".to_vec()
    );
}
