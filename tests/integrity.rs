use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use shardset::archive::{ArchiveWriter, Member};
use shardset::codecs::audio::AudioCodec;
use shardset::mapper::encode_sample;
use shardset::{
    CodecRegistry, Compression, DataType, DatasetInfo, Feature, Features, LeafCodec, LeafKind,
    ShardError, ShardReader, ShardResult, ShardWriter, Tensor, Value, WriterOptions,
};
use tempfile::TempDir;

fn text_and_ints() -> Features {
    Features::new([
        ("a", Feature::Text),
        ("b", Feature::sequence(Feature::scalar(DataType::Int32))),
    ])
    .unwrap()
}

fn sample(n: i32) -> Value {
    Value::record([("a", Value::from("x")), ("b", Value::list(0..n))])
}

/// Write `members` as shard 00000 and a matching one-sample ledger.
fn craft_dataset(dir: &TempDir, features: Features, members: &[Member]) {
    let mut archive = ArchiveWriter::create(dir.path().join("00000.tar")).unwrap();
    archive.append(members, Compression::Stored).unwrap();
    archive.finish().unwrap();

    let mut info = DatasetInfo::new(features);
    info.file_list = vec!["00000.tar".into()];
    info.write_to(dir.path().join("dataset_info.json")).unwrap();
}

fn first_sample(dir: &TempDir) -> ShardResult<Value> {
    let reader = ShardReader::from_dataset_info(dir.path())?;
    reader.iter().next().expect("one sample")?.value.force_all()
}

#[test]
fn sequence_gap_is_an_integrity_error() {
    let registry = CodecRegistry::default();
    let members: Vec<Member> = encode_sample(&text_and_ints(), &registry, &sample(4), 0)
        .unwrap()
        .into_iter()
        .filter(|m| m.path.to_string() != "0/b/2")
        .collect();

    let dir = TempDir::new().unwrap();
    craft_dataset(&dir, text_and_ints(), &members);
    assert!(matches!(
        first_sample(&dir),
        Err(ShardError::ArchiveIntegrity { .. })
    ));
}

#[test]
fn dropping_the_last_sequence_element_is_an_integrity_error() {
    let registry = CodecRegistry::default();
    let members: Vec<Member> = encode_sample(&text_and_ints(), &registry, &sample(4), 0)
        .unwrap()
        .into_iter()
        .filter(|m| m.path.to_string() != "0/b/3")
        .collect();

    let dir = TempDir::new().unwrap();
    craft_dataset(&dir, text_and_ints(), &members);
    let reader = ShardReader::from_dataset_info(dir.path()).unwrap();
    match reader.get(0) {
        Err(ShardError::ArchiveIntegrity { location, reason }) => {
            assert_eq!(location, "00000.tar");
            assert!(reason.contains("0/b"), "{reason}");
        }
        other => panic!("expected integrity error, got {other:?}"),
    }
}

#[test]
fn corrupt_raw_size_is_an_integrity_error() {
    // A gzip member whose PAX header claims an impossible decompressed size.
    let mut builder = tar::Builder::new(Vec::new());
    let mut directory = tar::Header::new_ustar();
    directory.set_entry_type(tar::EntryType::Directory);
    directory.set_size(0);
    builder.append_data(&mut directory, "0", std::io::empty()).unwrap();

    let packed = Compression::Gzip(Default::default()).compress(b"x").unwrap();
    let raw_size = u64::MAX.to_string();
    builder
        .append_pax_extensions([
            ("SHARDSET.compression", &b"gzip"[..]),
            ("SHARDSET.size", raw_size.as_bytes()),
        ])
        .unwrap();
    let mut file = tar::Header::new_ustar();
    file.set_entry_type(tar::EntryType::Regular);
    file.set_size(packed.len() as u64);
    builder.append_data(&mut file, "0/a", packed.as_ref()).unwrap();

    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("00000.tar"), builder.into_inner().unwrap()).unwrap();
    let features = Features::new([("a", Feature::Text)]).unwrap();
    let mut info = DatasetInfo::new(features);
    info.file_list = vec!["00000.tar".into()];
    info.write_to(dir.path().join("dataset_info.json")).unwrap();

    let reader = ShardReader::from_dataset_info(dir.path()).unwrap();
    assert!(matches!(
        reader.get(0),
        Err(ShardError::ArchiveIntegrity { .. })
    ));
}

#[test]
fn unfinished_shard_is_an_integrity_error() {
    let registry = CodecRegistry::default();
    let dir = TempDir::new().unwrap();
    craft_dataset(
        &dir,
        text_and_ints(),
        &encode_sample(&text_and_ints(), &registry, &sample(3), 0).unwrap(),
    );
    // Drop the two zero blocks that close the archive.
    let path = dir.path().join("00000.tar");
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 1024]).unwrap();
    assert!(matches!(
        first_sample(&dir),
        Err(ShardError::ArchiveIntegrity { .. })
    ));
}

#[test]
fn missing_leaf_is_an_integrity_error() {
    let registry = CodecRegistry::default();
    let members: Vec<Member> = encode_sample(&text_and_ints(), &registry, &sample(1), 0)
        .unwrap()
        .into_iter()
        .filter(|m| m.path.to_string() != "0/a")
        .collect();
    let dir = TempDir::new().unwrap();
    craft_dataset(&dir, text_and_ints(), &members);
    match first_sample(&dir) {
        Err(ShardError::ArchiveIntegrity { location, reason }) => {
            assert_eq!(location, "00000.tar");
            assert!(reason.contains("0/a"), "{reason}");
        }
        other => panic!("expected integrity error, got {other:?}"),
    }
}

#[test]
fn corrupt_eager_leaf_is_a_decode_error_with_path() {
    let root = shardset::MemberPath::sample(0);
    let members = vec![
        Member::directory(root.clone()),
        Member::file(root.field("a"), vec![0xff, 0xfe]),
        Member::directory(root.field("b")),
    ];
    let dir = TempDir::new().unwrap();
    craft_dataset(&dir, text_and_ints(), &members);
    match first_sample(&dir) {
        Err(ShardError::Decode { path, .. }) => assert_eq!(path, "0/a"),
        other => panic!("expected decode error, got {other:?}"),
    }
}

#[test]
fn missing_shard_file_is_an_integrity_error() {
    let dir = TempDir::new().unwrap();
    let mut writer =
        ShardWriter::create(dir.path(), DatasetInfo::new(text_and_ints()), WriterOptions::default())
            .unwrap();
    writer.write(&sample(2)).unwrap();
    writer.close().unwrap();
    std::fs::remove_file(dir.path().join("00000.tar")).unwrap();

    let reader = ShardReader::from_dataset_info(dir.path()).unwrap();
    let results: Vec<_> = reader.iter().collect();
    assert_eq!(results.len(), 1);
    assert!(matches!(
        results[0],
        Err(ShardError::ArchiveIntegrity { .. })
    ));
    assert!(matches!(
        reader.get(0),
        Err(ShardError::ArchiveIntegrity { .. })
    ));
}

#[test]
fn ledger_longer_than_shard_is_an_integrity_error() {
    let registry = CodecRegistry::default();
    let dir = TempDir::new().unwrap();
    let mut archive = ArchiveWriter::create(dir.path().join("00000.tar")).unwrap();
    archive
        .append(
            &encode_sample(&text_and_ints(), &registry, &sample(1), 0).unwrap(),
            Compression::Stored,
        )
        .unwrap();
    archive.finish().unwrap();
    let mut info = DatasetInfo::new(text_and_ints());
    info.file_list = vec!["00000.tar".into(), "00000.tar".into()];
    info.write_to(dir.path().join("dataset_info.json")).unwrap();

    let reader = ShardReader::from_dataset_info(dir.path()).unwrap();
    assert!(matches!(
        reader.get(1),
        Err(ShardError::ArchiveIntegrity { .. })
    ));
}

#[test]
fn malformed_dataset_info_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        ShardReader::from_dataset_info(dir.path()),
        Err(ShardError::Config(_))
    ));

    std::fs::write(dir.path().join("dataset_info.json"), b"{ \"file_list\": [] }").unwrap();
    assert!(matches!(
        ShardReader::from_dataset_info(dir.path()),
        Err(ShardError::Config(_))
    ));

    std::fs::write(
        dir.path().join("dataset_info.json"),
        br#"{ "features": { "a": { "_type": "Text" } }, "file_list": ["00001.tar", "00000.tar"] }"#,
    )
    .unwrap();
    assert!(matches!(
        ShardReader::from_dataset_info(dir.path()),
        Err(ShardError::Config(_))
    ));
}

#[test]
fn mismatched_sample_leaves_the_shard_untouched() {
    let dir = TempDir::new().unwrap();
    let mut writer =
        ShardWriter::create(dir.path(), DatasetInfo::new(text_and_ints()), WriterOptions::default())
            .unwrap();
    writer.write(&sample(2)).unwrap();
    let shard = dir.path().join("00000.tar");
    let size_before = std::fs::metadata(&shard).unwrap().len();

    let missing_field = Value::record([("a", Value::from("only a"))]);
    for _ in 0..3 {
        assert!(matches!(
            writer.write(&missing_field),
            Err(ShardError::SchemaMismatch { .. })
        ));
    }
    let bad_leaf = Value::record([("a", Value::from("x")), ("b", Value::list([1.5f64]))]);
    assert!(matches!(writer.write(&bad_leaf), Err(ShardError::Encode { .. })));
    assert_eq!(std::fs::metadata(&shard).unwrap().len(), size_before);

    writer.write(&sample(3)).unwrap();
    writer.close().unwrap();
    let reader = ShardReader::from_dataset_info(dir.path()).unwrap();
    let values: Vec<Value> = reader.iter().map(|s| s.unwrap().value).collect();
    assert_eq!(values, vec![sample(2), sample(3)]);
}

// ---------------------------------------------------------------------------
// Laziness
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct CountingAudio {
    decodes: AtomicUsize,
}

impl LeafCodec for CountingAudio {
    fn encode(&self, feature: &Feature, value: &Value) -> ShardResult<Vec<u8>> {
        AudioCodec.encode(feature, value)
    }

    fn decode(&self, feature: &Feature, data: &[u8]) -> ShardResult<Value> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        AudioCodec.decode(feature, data)
    }

    fn decodes_lazily(&self) -> bool {
        true
    }
}

#[test]
fn lazy_leaves_decode_only_on_access() {
    let features = Features::new([("clip", Feature::audio(Some(4))), ("label", Feature::Text)]).unwrap();
    let clip = Tensor::vector((0..16).map(|i| i as f32).collect::<Vec<_>>());
    let dir = TempDir::new().unwrap();
    let mut writer =
        ShardWriter::create(dir.path(), DatasetInfo::new(features), WriterOptions::default()).unwrap();
    for i in 0..5 {
        writer
            .write(&Value::record([
                ("clip", Value::from(clip.clone())),
                ("label", Value::from(format!("{i}"))),
            ]))
            .unwrap();
    }
    writer.close().unwrap();

    let counting = Arc::new(CountingAudio::default());
    let mut registry = CodecRegistry::default();
    registry.register(LeafKind::Audio, counting.clone());
    let reader = ShardReader::with_registry(dir.path(), registry).unwrap();

    let samples: Vec<_> = reader.iter().map(Result::unwrap).collect();
    assert_eq!(samples.len(), 5);
    assert_eq!(counting.decodes.load(Ordering::SeqCst), 0);

    let handle = samples[3].value.get("clip").and_then(Value::as_lazy).unwrap();
    let shard_len = std::fs::metadata(dir.path().join("00000.tar")).unwrap().len() as usize;
    let range = handle.byte_range();
    assert!(range.end <= shard_len);
    assert_eq!(handle.raw_bytes().len(), range.len());

    assert_eq!(handle.force().unwrap(), &Value::Tensor(clip.clone()));
    assert_eq!(handle.force().unwrap(), &Value::Tensor(clip));
    assert_eq!(counting.decodes.load(Ordering::SeqCst), 1);

    let window = handle.read_range(1.0, 2.0).unwrap();
    assert_eq!(window, Tensor::vector(vec![4.0f32, 5.0, 6.0, 7.0]));
    assert_eq!(counting.decodes.load(Ordering::SeqCst), 1);
}

#[test]
fn corrupt_lazy_leaf_fails_only_when_accessed() {
    let features = Features::new([("clip", Feature::audio(Some(4)))]).unwrap();
    let root = shardset::MemberPath::sample(0);
    let members = vec![
        Member::directory(root.clone()),
        Member::file(root.field("clip"), vec![9, 9, 9]),
    ];
    let dir = TempDir::new().unwrap();
    craft_dataset(&dir, features, &members);

    let reader = ShardReader::from_dataset_info(dir.path()).unwrap();
    let sample = reader.get(0).unwrap().unwrap();
    let handle = sample.value.get("clip").and_then(Value::as_lazy).unwrap();
    match handle.force() {
        Err(ShardError::Decode { path, .. }) => assert_eq!(path, "0/clip"),
        other => panic!("expected decode error, got {other:?}"),
    }
}
