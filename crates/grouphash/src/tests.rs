use super::*;
use std::collections::HashSet;

// -------------------- Helpers --------------------

/// Toy detoaster: "compressed" payloads are `(count, byte)` run-length pairs,
/// external values live in a fixed table indexed by `value_id`.
struct RunLengthStore {
    external: Vec<Vec<u8>>,
}

impl Detoast for RunLengthStore {
    fn decompress(&self, payload: &[u8]) -> Result<Vec<u8>, DetoastError> {
        if payload.len() % 2 != 0 {
            return Err("odd run-length payload".into());
        }
        let mut out = Vec::new();
        for pair in payload.chunks(2) {
            out.extend(std::iter::repeat(pair[1]).take(pair[0] as usize));
        }
        Ok(out)
    }

    fn fetch_external(&self, reference: &ExternalRef) -> Result<Vec<u8>, DetoastError> {
        self.external
            .get(reference.value_id as usize)
            .cloned()
            .ok_or_else(|| "no such external value".into())
    }
}

// -------------------- Null group --------------------

#[test]
fn null_key_hashes_to_zero() {
    let hasher = GroupKeyHasher::inline_only();
    assert_eq!(hasher.hash(&KeyValue::Null).unwrap(), GroupHash::ZERO);
    assert!(GroupHash::ZERO.is_zero());
}

#[test]
fn non_null_keys_never_hash_to_zero() {
    let hasher = GroupKeyHasher::inline_only();
    for key in [
        KeyValue::Bool(false),
        KeyValue::Int64(0),
        KeyValue::Text(String::new()),
        KeyValue::Bytes(Vec::new()),
    ] {
        assert!(!hasher.hash(&key).unwrap().is_zero(), "{key:?}");
    }
}

// -------------------- Stability / canonical bytes --------------------

#[test]
fn same_value_hashes_identically() {
    let hasher = GroupKeyHasher::inline_only();
    let a = hasher.hash(&KeyValue::Int64(42)).unwrap();
    let b = hasher.hash(&KeyValue::Int64(42)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn text_and_inline_varlena_agree() {
    let hasher = GroupKeyHasher::inline_only();
    let text = hasher.hash(&KeyValue::Text("device-17".into())).unwrap();
    let inline = hasher
        .hash(&KeyValue::Varlena(Varlena::Inline(b"device-17".to_vec())))
        .unwrap();
    let bytes = hasher.hash(&KeyValue::Bytes(b"device-17".to_vec())).unwrap();
    assert_eq!(text, inline);
    assert_eq!(text, bytes);
}

#[test]
fn compressed_and_external_resolve_to_inline_hash() {
    let store = RunLengthStore {
        external: vec![b"aaaabbb".to_vec()],
    };
    let hasher = GroupKeyHasher::new(store);

    let inline = hasher
        .hash(&KeyValue::Varlena(Varlena::Inline(b"aaaabbb".to_vec())))
        .unwrap();
    let compressed = hasher
        .hash(&KeyValue::Varlena(Varlena::Compressed(vec![4, b'a', 3, b'b'])))
        .unwrap();
    let external = hasher
        .hash(&KeyValue::Varlena(Varlena::External(ExternalRef {
            value_id: 0,
            raw_len: 7,
        })))
        .unwrap();

    assert_eq!(inline, compressed);
    assert_eq!(inline, external);
}

#[test]
fn shared_detoaster_behind_arc() {
    let shared: Arc<dyn Detoast + Send + Sync> = Arc::new(RunLengthStore {
        external: Vec::new(),
    });
    let hasher = GroupKeyHasher::new(shared);
    let compressed = hasher
        .hash(&KeyValue::Varlena(Varlena::Compressed(vec![2, b'z'])))
        .unwrap();
    assert_eq!(compressed, hasher.hash(&KeyValue::Text("zz".into())).unwrap());
}

#[test]
fn external_length_mismatch_is_rejected() {
    let store = RunLengthStore {
        external: vec![b"abc".to_vec()],
    };
    let hasher = GroupKeyHasher::new(store);
    let err = hasher
        .hash(&KeyValue::Varlena(Varlena::External(ExternalRef {
            value_id: 0,
            raw_len: 10,
        })))
        .unwrap_err();
    assert!(matches!(
        err,
        HashError::LengthMismatch {
            expected: 10,
            actual: 3
        }
    ));
}

#[test]
fn inline_only_rejects_indirect_values() {
    let hasher = GroupKeyHasher::inline_only();
    let err = hasher
        .hash(&KeyValue::Varlena(Varlena::Compressed(vec![1, 2])))
        .unwrap_err();
    assert!(matches!(err, HashError::Detoast(_)));
}

#[test]
fn float_zero_and_nan_are_canonical() {
    let hasher = GroupKeyHasher::inline_only();
    assert_eq!(
        hasher.hash(&KeyValue::Float64(0.0)).unwrap(),
        hasher.hash(&KeyValue::Float64(-0.0)).unwrap()
    );
    let quiet = f64::NAN;
    let other = f64::from_bits(0x7ff8_0000_0000_0001);
    assert!(other.is_nan());
    assert_eq!(
        hasher.hash(&KeyValue::Float64(quiet)).unwrap(),
        hasher.hash(&KeyValue::Float64(other)).unwrap()
    );
}

// -------------------- Collision resistance --------------------

#[test]
fn million_distinct_keys_have_distinct_hashes() {
    let hasher = GroupKeyHasher::inline_only();
    let n = 1_000_000;
    let mut seen = HashSet::with_capacity(n);
    for i in 0..n {
        let key = KeyValue::Text(format!("group-{i}"));
        assert!(seen.insert(hasher.hash(&key).unwrap().as_u128()));
    }
    assert_eq!(seen.len(), n);
}

#[test]
fn distinct_integer_keys_have_distinct_hashes() {
    let hasher = GroupKeyHasher::inline_only();
    let mut seen = HashSet::new();
    for i in -50_000i64..50_000 {
        assert!(seen.insert(hasher.hash(&KeyValue::Int64(i)).unwrap()));
    }
}

// -------------------- lock_id / representation --------------------

#[test]
fn lock_id_folds_table_and_halves() {
    let h = GroupHash::new(0xff00, 0x00ff);
    assert_eq!(lock_id(0, h), 0xffff);
    assert_eq!(lock_id(1, h), 0xfffe);
    assert_ne!(lock_id(7, h), lock_id(8, h));
}

#[test]
fn u128_round_trip_preserves_halves() {
    let h = GroupHash::new(0x0123_4567_89ab_cdef, 0xfedc_ba98_7654_3210);
    assert_eq!(GroupHash::from_u128(h.as_u128()), h);
    assert_eq!(h.to_string(), "0123456789abcdeffedcba9876543210");
}
