//! Mapping between value trees and archive members.
//!
//! Encoding walks schema and value together, depth first: struct fields in
//! schema order, sequence elements in list order. Every container becomes a
//! directory member written before its children, every leaf one file member.
//! Decoding rebuilds the tree from the members of one sample, indexed by
//! [`MemberTree`].

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::archive::{Entry, Member, MemberKind};
use crate::codecs::{CodecRegistry, LeafCodec};
use crate::error::{ShardError, ShardResult};
use crate::features::{Feature, Features};
use crate::lazy::LazyValue;
use crate::path::{MemberPath, Segment};
use crate::value::Value;

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Encode sample `index` into its members, in write order.
///
/// Lazy leaves in `value` are decoded first, so samples read from one
/// dataset can be written to another.
pub fn encode_sample(
    features: &Features,
    registry: &CodecRegistry,
    value: &Value,
    index: usize,
) -> ShardResult<Vec<Member>> {
    let root = MemberPath::sample(index);
    let mut members = Vec::new();
    match value {
        Value::Struct(fields) => {
            encode_struct(features, fields, &root, registry, &mut members)?;
        }
        other => {
            return Err(ShardError::mismatch(
                &root,
                format!("a sample must be a struct, got {}", other.kind_name()),
            ));
        }
    }
    Ok(members)
}

fn encode_struct(
    features: &Features,
    fields: &BTreeMap<String, Value>,
    path: &MemberPath,
    registry: &CodecRegistry,
    out: &mut Vec<Member>,
) -> ShardResult<()> {
    if let Some(extra) = fields.keys().find(|name| !features.contains(name)) {
        return Err(ShardError::mismatch(
            path.field(extra),
            "field is not declared in the schema",
        ));
    }
    out.push(Member::directory(path.clone()));
    for (name, feature) in features.iter() {
        let child = path.field(name);
        let value = fields
            .get(name)
            .ok_or_else(|| ShardError::mismatch(&child, "missing declared field"))?;
        encode_node(feature, value, &child, registry, out)?;
    }
    Ok(())
}

fn encode_node(
    feature: &Feature,
    value: &Value,
    path: &MemberPath,
    registry: &CodecRegistry,
    out: &mut Vec<Member>,
) -> ShardResult<()> {
    if let Value::Lazy(handle) = value {
        return encode_node(feature, handle.force()?, path, registry, out);
    }

    match feature {
        Feature::Struct(fields) => match value {
            Value::Struct(values) => encode_struct(fields, values, path, registry, out),
            other => Err(ShardError::mismatch(
                path,
                format!("expected struct, got {}", other.kind_name()),
            )),
        },
        Feature::Sequence { feature, length } => {
            let Value::List(items) = value else {
                return Err(ShardError::mismatch(
                    path,
                    format!("expected list, got {}", value.kind_name()),
                ));
            };
            if let Some(length) = length
                && items.len() != *length
            {
                return Err(ShardError::mismatch(
                    path,
                    format!("sequence holds {} items, schema fixes {length}", items.len()),
                ));
            }
            out.push(Member::sequence(path.clone(), items.len()));
            for (i, item) in items.iter().enumerate() {
                encode_node(feature, item, &path.index(i), registry, out)?;
            }
            Ok(())
        }
        leaf => {
            if matches!(value, Value::List(_) | Value::Struct(_)) {
                return Err(ShardError::mismatch(
                    path,
                    format!("expected {} leaf, got {}", leaf.kind_name(), value.kind_name()),
                ));
            }
            let codec = leaf_codec(registry, leaf, path)?;
            let data = codec.encode(leaf, value).map_err(|e| ShardError::Encode {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
            out.push(Member::file(path.clone(), data));
            Ok(())
        }
    }
}

fn leaf_codec<'a>(
    registry: &'a CodecRegistry,
    feature: &Feature,
    path: &MemberPath,
) -> ShardResult<&'a Arc<dyn LeafCodec>> {
    feature
        .leaf_kind()
        .map(|kind| registry.get(kind))
        .ok_or_else(|| ShardError::mismatch(path, format!("{} is not a leaf", feature.kind_name())))
}

// ---------------------------------------------------------------------------
// MemberTree
// ---------------------------------------------------------------------------

/// The members of one sample, arranged by path.
///
/// A node without an entry is an implied parent that has no record of its
/// own; reaching one while decoding means a member is missing.
#[derive(Debug, Default, Clone)]
pub struct MemberTree {
    entry: Option<Entry>,
    children: BTreeMap<Segment, MemberTree>,
}

impl MemberTree {
    /// Place `entry` at `segments` below this node. A second member at the
    /// same path is an error.
    pub fn insert(&mut self, segments: &[Segment], entry: Entry) -> Result<(), Entry> {
        let mut node = self;
        for segment in segments {
            node = node.children.entry(segment.clone()).or_default();
        }
        if node.entry.is_some() {
            return Err(entry);
        }
        node.entry = Some(entry);
        Ok(())
    }

    pub fn entry(&self) -> Option<&Entry> {
        self.entry.as_ref()
    }

    pub fn child(&self, segment: &Segment) -> Option<&MemberTree> {
        self.children.get(segment)
    }

    pub fn children(&self) -> impl Iterator<Item = (&Segment, &MemberTree)> {
        self.children.iter()
    }

    /// Number of members at or below this node.
    pub fn member_count(&self) -> usize {
        usize::from(self.entry.is_some())
            + self.children.values().map(MemberTree::member_count).sum::<usize>()
    }
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Everything decoding needs besides the schema.
pub struct DecodeContext<'a> {
    pub registry: &'a CodecRegistry,
    /// The whole shard; entries address ranges within it.
    pub source: &'a Bytes,
    /// Shard name for integrity errors.
    pub location: &'a str,
}

/// Rebuild sample `index` from its member tree.
pub fn decode_sample(
    features: &Features,
    tree: &MemberTree,
    index: usize,
    ctx: &DecodeContext<'_>,
) -> ShardResult<Value> {
    let root = MemberPath::sample(index);
    expect_kind(tree, &root, MemberKind::Directory, ctx)?;
    decode_struct(features, tree, &root, ctx)
}

fn decode_struct(
    features: &Features,
    node: &MemberTree,
    path: &MemberPath,
    ctx: &DecodeContext<'_>,
) -> ShardResult<Value> {
    for (segment, _) in node.children() {
        let known = matches!(segment, Segment::Field(name) if features.contains(name));
        if !known {
            return Err(ShardError::integrity(
                ctx.location,
                format!("unexpected member {}", path.child(segment.clone())),
            ));
        }
    }
    let mut values = BTreeMap::new();
    for (name, feature) in features.iter() {
        let child_path = path.field(name);
        let child = node
            .child(&Segment::Field(name.to_string()))
            .ok_or_else(|| missing(&child_path, ctx))?;
        values.insert(name.to_string(), decode_node(feature, child, &child_path, ctx)?);
    }
    Ok(Value::Struct(values))
}

fn decode_node(
    feature: &Feature,
    node: &MemberTree,
    path: &MemberPath,
    ctx: &DecodeContext<'_>,
) -> ShardResult<Value> {
    match feature {
        Feature::Struct(fields) => {
            expect_kind(node, path, MemberKind::Directory, ctx)?;
            decode_struct(fields, node, path, ctx)
        }
        Feature::Sequence { feature, length } => {
            let recorded = expect_kind(node, path, MemberKind::Directory, ctx)?
                .length
                .ok_or_else(|| {
                    ShardError::integrity(
                        ctx.location,
                        format!("sequence {path} does not record its length"),
                    )
                })?;
            let mut items = Vec::with_capacity(node.children.len());
            // Children are ordered by segment: indices numerically, so any
            // hole shows up as the first position whose index disagrees.
            for (position, (segment, child)) in node.children().enumerate() {
                let child_path = path.child(segment.clone());
                match segment {
                    Segment::Index(i) if *i == position => {}
                    Segment::Index(i) => {
                        return Err(ShardError::integrity(
                            ctx.location,
                            format!("sequence {path} has a gap: index {position} missing before {i}"),
                        ));
                    }
                    Segment::Field(_) => {
                        return Err(ShardError::integrity(
                            ctx.location,
                            format!("unexpected member {child_path}"),
                        ));
                    }
                }
                items.push(decode_node(feature, child, &child_path, ctx)?);
            }
            if items.len() != recorded {
                return Err(ShardError::integrity(
                    ctx.location,
                    format!("sequence {path} holds {} of its {recorded} items", items.len()),
                ));
            }
            if let Some(length) = length
                && items.len() != *length
            {
                return Err(ShardError::integrity(
                    ctx.location,
                    format!("sequence {path} holds {} items, schema fixes {length}", items.len()),
                ));
            }
            Ok(Value::List(items))
        }
        leaf => {
            let entry = expect_kind(node, path, MemberKind::File, ctx)?;
            if let Some((segment, _)) = node.children().next() {
                return Err(ShardError::integrity(
                    ctx.location,
                    format!("unexpected member {}", path.child(segment.clone())),
                ));
            }
            let codec = leaf_codec(ctx.registry, leaf, path)?;
            if codec.decodes_lazily() {
                return Ok(Value::Lazy(LazyValue::new(
                    leaf,
                    Arc::clone(codec),
                    ctx.source,
                    entry,
                )));
            }
            let decode_error = |e: ShardError| ShardError::Decode {
                path: path.to_string(),
                reason: e.to_string(),
            };
            let raw = entry
                .compression
                .decompress(&ctx.source[entry.range.clone()], entry.raw_len)
                .map_err(decode_error)?;
            codec.decode(leaf, &raw).map_err(decode_error)
        }
    }
}

fn expect_kind<'t>(
    node: &'t MemberTree,
    path: &MemberPath,
    kind: MemberKind,
    ctx: &DecodeContext<'_>,
) -> ShardResult<&'t Entry> {
    let entry = node.entry().ok_or_else(|| missing(path, ctx))?;
    if entry.kind != kind {
        return Err(ShardError::integrity(
            ctx.location,
            format!("member {path} should be a {kind:?}, found {:?}", entry.kind),
        ));
    }
    Ok(entry)
}

fn missing(path: &MemberPath, ctx: &DecodeContext<'_>) -> ShardError {
    ShardError::integrity(ctx.location, format!("missing member {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::Compression;
    use crate::types::{DataType, Tensor};

    fn schema() -> Features {
        Features::new([
            ("a", Feature::Text),
            ("b", Feature::sequence(Feature::scalar(DataType::Int32))),
        ])
        .unwrap()
    }

    fn sample(n: i32) -> Value {
        Value::record([("a", Value::from("x")), ("b", Value::list(1..=n))])
    }

    /// Lay members out back to back the way the archive would and index them.
    fn lay_out(members: &[Member]) -> (Bytes, MemberTree) {
        let mut source = Vec::new();
        let mut tree = MemberTree::default();
        for member in members {
            let start = source.len();
            source.extend_from_slice(&member.data);
            let entry = Entry {
                path: member.path.clone(),
                kind: member.kind,
                compression: Compression::Stored,
                range: start..source.len(),
                raw_len: member.data.len(),
                length: member.length,
            };
            tree.insert(&member.path.segments()[1..], entry).unwrap();
        }
        (Bytes::from(source), tree)
    }

    fn decode(features: &Features, members: &[Member]) -> ShardResult<Value> {
        let registry = CodecRegistry::default();
        let (source, tree) = lay_out(members);
        let ctx = DecodeContext {
            registry: &registry,
            source: &source,
            location: "test",
        };
        decode_sample(features, &tree, 0, &ctx)
    }

    #[test]
    fn members_follow_schema_order() {
        let registry = CodecRegistry::default();
        let members = encode_sample(&schema(), &registry, &sample(2), 4).unwrap();
        let paths: Vec<String> = members.iter().map(|m| m.path.to_string()).collect();
        assert_eq!(paths, vec!["4", "4/a", "4/b", "4/b/0", "4/b/1"]);
        assert_eq!(members[0].kind, MemberKind::Directory);
        assert_eq!(members[0].length, None);
        assert_eq!(members[2].length, Some(2));
        assert_eq!(members[3].data, 1i32.to_le_bytes());
    }

    #[test]
    fn decode_inverts_encode() {
        let registry = CodecRegistry::default();
        let value = sample(3);
        let members = encode_sample(&schema(), &registry, &value, 0).unwrap();
        assert_eq!(decode(&schema(), &members).unwrap(), value);
    }

    #[test]
    fn empty_sequence_survives() {
        let registry = CodecRegistry::default();
        let value = sample(0);
        let members = encode_sample(&schema(), &registry, &value, 0).unwrap();
        assert_eq!(decode(&schema(), &members).unwrap(), value);
    }

    #[test]
    fn eleven_elements_decode_in_numeric_order() {
        let registry = CodecRegistry::default();
        let value = sample(11);
        let mut members = encode_sample(&schema(), &registry, &value, 0).unwrap();
        members.reverse();
        let decoded = decode(&schema(), &members).unwrap();
        let items = decoded.get("b").and_then(Value::as_list).unwrap();
        assert_eq!(items[9], Value::from(10));
        assert_eq!(items[10], Value::from(11));
    }

    #[test]
    fn missing_and_extra_fields_are_mismatches() {
        let registry = CodecRegistry::default();
        let missing = Value::record([("a", Value::from("x"))]);
        let err = encode_sample(&schema(), &registry, &missing, 0).unwrap_err();
        assert!(matches!(&err, ShardError::SchemaMismatch { path, .. } if path == "0/b"));

        let extra = Value::record([
            ("a", Value::from("x")),
            ("b", Value::list(Vec::<i32>::new())),
            ("c", Value::from(1u8)),
        ]);
        let err = encode_sample(&schema(), &registry, &extra, 0).unwrap_err();
        assert!(matches!(&err, ShardError::SchemaMismatch { path, .. } if path == "0/c"));
    }

    #[test]
    fn container_leaf_confusion_is_a_mismatch() {
        let registry = CodecRegistry::default();
        let wrong = Value::record([("a", Value::list(["x"])), ("b", Value::list([1i32]))]);
        assert!(matches!(
            encode_sample(&schema(), &registry, &wrong, 0),
            Err(ShardError::SchemaMismatch { .. })
        ));
        let wrong = Value::record([("a", Value::from("x")), ("b", Value::from(1i32))]);
        assert!(matches!(
            encode_sample(&schema(), &registry, &wrong, 0),
            Err(ShardError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn leaf_rejections_are_tagged_with_the_path() {
        let registry = CodecRegistry::default();
        let wrong = Value::record([("a", Value::from("x")), ("b", Value::list([1i64]))]);
        match encode_sample(&schema(), &registry, &wrong, 2) {
            Err(ShardError::Encode { path, .. }) => assert_eq!(path, "2/b/0"),
            other => panic!("expected encode error, got {other:?}"),
        }
    }

    #[test]
    fn fixed_length_sequences_are_checked() {
        let registry = CodecRegistry::default();
        let features = Features::new([(
            "pair",
            Feature::fixed_sequence(Feature::scalar(DataType::Int32), 2),
        )])
        .unwrap();
        let ok = Value::record([("pair", Value::list([1i32, 2]))]);
        assert!(encode_sample(&features, &registry, &ok, 0).is_ok());
        let bad = Value::record([("pair", Value::list([1i32, 2, 3]))]);
        assert!(matches!(
            encode_sample(&features, &registry, &bad, 0),
            Err(ShardError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn gaps_and_missing_members_are_integrity_errors() {
        let registry = CodecRegistry::default();
        let members = encode_sample(&schema(), &registry, &sample(3), 0).unwrap();

        let gap: Vec<Member> = members
            .iter()
            .filter(|m| m.path.to_string() != "0/b/1")
            .cloned()
            .collect();
        assert!(matches!(
            decode(&schema(), &gap),
            Err(ShardError::ArchiveIntegrity { .. })
        ));

        let no_text: Vec<Member> = members
            .iter()
            .filter(|m| m.path.to_string() != "0/a")
            .cloned()
            .collect();
        assert!(matches!(
            decode(&schema(), &no_text),
            Err(ShardError::ArchiveIntegrity { .. })
        ));

        let no_last: Vec<Member> = members
            .iter()
            .filter(|m| m.path.to_string() != "0/b/2")
            .cloned()
            .collect();
        match decode(&schema(), &no_last) {
            Err(ShardError::ArchiveIntegrity { reason, .. }) => {
                assert!(reason.contains("0/b"), "{reason}")
            }
            other => panic!("expected integrity error, got {other:?}"),
        }

        let no_dir: Vec<Member> = members
            .iter()
            .filter(|m| m.path.to_string() != "0/b")
            .cloned()
            .collect();
        assert!(matches!(
            decode(&schema(), &no_dir),
            Err(ShardError::ArchiveIntegrity { .. })
        ));
    }

    #[test]
    fn duplicate_members_are_refused_by_the_tree() {
        let mut tree = MemberTree::default();
        let entry = Entry {
            path: MemberPath::sample(0).field("a"),
            kind: MemberKind::File,
            compression: Compression::Stored,
            range: 0..0,
            raw_len: 0,
            length: None,
        };
        let segments = [Segment::Field("a".into())];
        tree.insert(&segments, entry.clone()).unwrap();
        assert!(tree.insert(&segments, entry).is_err());
        assert_eq!(tree.member_count(), 1);
    }

    #[test]
    fn nested_structs_and_lazy_audio() {
        let registry = CodecRegistry::default();
        let features = Features::new([
            (
                "meta",
                Feature::Struct(Features::new([("id", Feature::scalar(DataType::UInt64))]).unwrap()),
            ),
            ("clips", Feature::sequence(Feature::audio(Some(16)))),
        ])
        .unwrap();
        let clip = Tensor::vector(vec![0.5f32; 8]);
        let value = Value::record([
            ("meta", Value::record([("id", Value::from(9u64))])),
            ("clips", Value::list([Value::from(clip.clone())])),
        ]);
        let members = encode_sample(&features, &registry, &value, 0).unwrap();
        let decoded = decode(&features, &members).unwrap();

        let handle = decoded.get("clips").and_then(Value::as_list).unwrap()[0]
            .as_lazy()
            .unwrap()
            .clone();
        assert!(!handle.is_decoded());
        assert_eq!(handle.path().to_string(), "0/clips/0");
        assert_eq!(decoded.force_all().unwrap(), value);
    }

    #[test]
    fn lazy_input_is_forced_when_reencoding() {
        let registry = CodecRegistry::default();
        let features = Features::new([("clip", Feature::audio(Some(16)))]).unwrap();
        let value = Value::record([("clip", Value::from(Tensor::vector(vec![1.0f32; 4])))]);
        let members = encode_sample(&features, &registry, &value, 0).unwrap();
        let read_back = decode(&features, &members).unwrap();
        assert!(read_back.get("clip").and_then(Value::as_lazy).is_some());

        let again = encode_sample(&features, &registry, &read_back, 0).unwrap();
        assert_eq!(again, members);
    }
}
