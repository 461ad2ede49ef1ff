use super::*;
use crate::format::{write_header, write_op, Header, Op, DELTA_MAGIC, HEADER_BYTES};

// -------------------- Helpers --------------------

fn document(version: u32) -> Vec<u8> {
    let mut doc = Vec::new();
    for line in 0..64u32 {
        let marker = if line == version % 64 { version } else { 0 };
        doc.extend_from_slice(format!("line {line:03}: reading={marker:08}\n").as_bytes());
    }
    doc
}

fn encode(tag: Tag, base: &[u8], target: &[u8]) -> Vec<u8> {
    DiffCodec::new().encode(tag, base, target, false).unwrap()
}

// -------------------- Tags --------------------

#[test]
fn tag_wire_mapping() {
    assert_eq!(Tag::from_wire(0), Tag::Keyframe);
    assert_eq!(Tag::from_wire(3), Tag::Back(3));
    assert_eq!(Tag::Back(7).to_wire(), 7);
    assert_eq!(Tag::Keyframe.to_wire(), 0);
    assert_eq!(Tag::back(0), None);
    assert_eq!(Tag::back(2), Some(Tag::Back(2)));
    assert!(Tag::Keyframe < Tag::Back(1));
    assert!(Tag::Back(1) < Tag::Back(2));
}

#[test]
fn tag_base_seq() {
    assert_eq!(Tag::Keyframe.base_seq(5), None);
    assert_eq!(Tag::Back(1).base_seq(5), Some(4));
    assert_eq!(Tag::Back(4).base_seq(5), Some(1));
    assert_eq!(Tag::Back(5).base_seq(5), None);
}

// -------------------- Round trips --------------------

#[test]
fn keyframe_decodes_against_empty_base() {
    let codec = DiffCodec::new();
    let target = document(1);
    let delta = encode(Tag::Keyframe, b"ignored", &target);

    assert_eq!(codec.tag_of(&delta).unwrap(), Tag::Keyframe);
    assert_eq!(codec.decode(&[], &delta).unwrap(), target);
    // Any base handed in for a keyframe is ignored.
    assert_eq!(codec.decode(b"whatever", &delta).unwrap(), target);
}

#[test]
fn diff_against_similar_base_is_small() {
    let codec = DiffCodec::new();
    let base = document(1);
    let target = document(2);

    let keyframe = encode(Tag::Keyframe, &[], &target);
    let delta = encode(Tag::Back(1), &base, &target);

    assert!(delta.len() * 4 < keyframe.len(), "{} vs {}", delta.len(), keyframe.len());
    assert_eq!(codec.decode(&base, &delta).unwrap(), target);
}

#[test]
fn unrelated_base_still_round_trips() {
    let codec = DiffCodec::new();
    let base = vec![0xAAu8; 300];
    let target: Vec<u8> = (0..=255u8).collect();
    let delta = encode(Tag::Back(2), &base, &target);
    assert_eq!(codec.tag_of(&delta).unwrap(), Tag::Back(2));
    assert_eq!(codec.decode(&base, &delta).unwrap(), target);
}

#[test]
fn empty_and_tiny_values_round_trip() {
    let codec = DiffCodec::new();
    for (base, target) in [
        (&b""[..], &b""[..]),
        (&b"abc"[..], &b""[..]),
        (&b""[..], &b"xy"[..]),
        (&b"ab"[..], &b"abc"[..]),
    ] {
        let delta = encode(Tag::Back(1), base, target);
        assert_eq!(codec.decode(base, &delta).unwrap(), target);
    }
    let empty_keyframe = encode(Tag::Keyframe, &[], &[]);
    assert_eq!(empty_keyframe.len(), HEADER_BYTES);
}

#[test]
fn extra_pass_never_grows_output() {
    let codec = DiffCodec::new();
    let base = document(10);
    let mut target = base.clone();
    target[700] ^= 0xff;

    let plain = codec.encode(Tag::Back(1), &base, &target, false).unwrap();
    let extra = codec.encode(Tag::Back(1), &base, &target, true).unwrap();
    assert!(extra.len() <= plain.len());
    assert_eq!(codec.decode(&base, &extra).unwrap(), target);
}

#[test]
fn repetitive_content_round_trips() {
    let codec = DiffCodec::with_min_match(4);
    let base = b"abababababababababababab".repeat(20);
    let mut target = base.clone();
    target.extend_from_slice(b"tail");
    let delta = encode(Tag::Back(1), &base, &target);
    assert_eq!(codec.decode(&base, &delta).unwrap(), target);
}

// -------------------- Corruption --------------------

#[test]
fn truncated_header_is_rejected() {
    let codec = DiffCodec::new();
    assert_eq!(codec.tag_of(&[DELTA_MAGIC, 0]), Err(CodecError::Truncated));
    assert_eq!(codec.decode(&[], &[]), Err(CodecError::Truncated));
}

#[test]
fn bad_magic_is_rejected() {
    let codec = DiffCodec::new();
    let mut delta = encode(Tag::Keyframe, &[], b"hello world");
    delta[0] = 0x00;
    assert_eq!(codec.decode(&[], &delta), Err(CodecError::BadMagic(0)));
    assert_eq!(codec.tag_of(&delta), Err(CodecError::BadMagic(0)));
}

#[test]
fn wrong_base_fails_checksum_or_range() {
    let codec = DiffCodec::new();
    let base = document(1);
    let target = document(2);
    let delta = encode(Tag::Back(1), &base, &target);

    let mut wrong = base.clone();
    wrong[0] ^= 0x55;
    assert_eq!(codec.decode(&wrong, &delta), Err(CodecError::ChecksumMismatch));

    let short = &base[..10];
    assert!(matches!(
        codec.decode(short, &delta),
        Err(CodecError::CopyOutOfRange { .. })
    ));
}

#[test]
fn truncated_ops_are_rejected() {
    let codec = DiffCodec::new();
    let delta = encode(Tag::Keyframe, &[], b"some literal payload");
    let cut = &delta[..delta.len() - 3];
    assert_eq!(codec.decode(&[], cut), Err(CodecError::Truncated));
}

#[test]
fn unknown_op_is_rejected() {
    let codec = DiffCodec::new();
    let mut delta = encode(Tag::Keyframe, &[], b"payload");
    delta[HEADER_BYTES] = 0x7f;
    assert_eq!(codec.decode(&[], &delta), Err(CodecError::UnknownOp(0x7f)));
}

#[test]
fn length_mismatch_is_rejected() {
    let codec = DiffCodec::new();
    let mut delta = Vec::new();
    write_header(
        &mut delta,
        &Header {
            tag: Tag::Back(1),
            target_len: 2,
            crc: 0,
        },
    )
    .unwrap();
    write_op(&mut delta, &Op::Insert(b"abc")).unwrap();
    assert_eq!(
        codec.decode(b"base", &delta),
        Err(CodecError::LengthMismatch {
            expected: 2,
            actual: 3
        })
    );
}
