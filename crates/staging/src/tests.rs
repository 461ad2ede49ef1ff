use super::*;
use crate::arena::Arena;

// -------------------- Helpers --------------------

fn g(n: u64) -> GroupHash {
    GroupHash::new(n, n.wrapping_mul(31) | 1)
}

fn bytes(s: &str) -> Arc<[u8]> {
    Arc::from(s.as_bytes())
}

fn stage(buf: &InsertStagingBuffer, token: &SlotToken, seq: Seq, cols: &[&str]) {
    for (col, value) in cols.iter().enumerate() {
        assert!(buf.push(token, seq, col, bytes(value)));
    }
    assert!(buf.commit(token, seq));
}

fn seqs(bases: &[RecentBase]) -> Vec<Seq> {
    bases.iter().map(|b| b.seq).collect()
}

// -------------------- Ring behaviour --------------------

#[test]
fn full_ring_returns_every_base_nearest_first() {
    let depth = 4;
    let buf = InsertStagingBuffer::new(8);
    let (token, is_new) = buf.acquire(1, g(1), depth, 2);
    assert!(is_new);

    for seq in 1..=depth as Seq {
        stage(&buf, &token, seq, &[format!("a{seq}").as_str(), format!("b{seq}").as_str()]);
    }

    let bases = buf.get_recent_bases(&token, depth as Seq + 1, 1, depth);
    assert_eq!(bases.len(), depth);
    let tags: Vec<u16> = bases.iter().map(|b| b.tag).collect();
    assert_eq!(tags, vec![1, 2, 3, 4]);
    for base in &bases {
        assert_eq!(&*base.bytes, format!("b{}", base.seq).as_bytes());
        assert_eq!(base.seq + base.tag as Seq, depth as Seq + 1);
    }
}

#[test]
fn ring_overwrites_oldest_first() {
    let buf = InsertStagingBuffer::new(4);
    let (token, _) = buf.acquire(1, g(1), 3, 1);
    for seq in 1..=5 {
        stage(&buf, &token, seq, &[format!("v{seq}").as_str()]);
    }
    let bases = buf.get_recent_bases(&token, 6, 0, 10);
    assert_eq!(seqs(&bases), vec![5, 4, 3]);
    assert_eq!(&*bases[0].bytes, b"v5");
}

#[test]
fn tags_outside_depth_are_skipped() {
    let buf = InsertStagingBuffer::new(4);
    let (token, _) = buf.acquire(1, g(1), 3, 1);
    for seq in 1..=3 {
        stage(&buf, &token, seq, &["x"]);
    }
    // Target equal to a staged seq: tag 0 is not a base.
    assert_eq!(seqs(&buf.get_recent_bases(&token, 3, 0, 10)), vec![2, 1]);
    // Target far ahead: everything is more than depth back.
    assert!(buf.get_recent_bases(&token, 10, 0, 10).is_empty());
    // Target below every staged row.
    assert!(buf.get_recent_bases(&token, 1, 0, 10).is_empty());
}

#[test]
fn max_limits_result() {
    let buf = InsertStagingBuffer::new(4);
    let (token, _) = buf.acquire(1, g(1), 5, 1);
    for seq in 1..=5 {
        stage(&buf, &token, seq, &["x"]);
    }
    assert_eq!(seqs(&buf.get_recent_bases(&token, 6, 0, 2)), vec![5, 4]);
    assert!(buf.get_recent_bases(&token, 6, 0, 0).is_empty());
}

#[test]
fn uncommitted_row_is_not_a_base() {
    let buf = InsertStagingBuffer::new(4);
    let (token, _) = buf.acquire(1, g(1), 3, 1);
    stage(&buf, &token, 1, &["one"]);
    assert!(buf.push(&token, 2, 0, bytes("two")));
    assert_eq!(seqs(&buf.get_recent_bases(&token, 3, 0, 3)), vec![1]);
}

#[test]
fn push_with_new_seq_resets_pending_row() {
    let buf = InsertStagingBuffer::new(4);
    let (token, _) = buf.acquire(1, g(1), 2, 2);
    // A failed insert left seq 1 half-written; the retry reuses the position.
    assert!(buf.push(&token, 1, 0, bytes("stale-a")));
    assert!(buf.push(&token, 1, 1, bytes("stale-b")));
    assert!(buf.push(&token, 2, 0, bytes("fresh")));
    assert!(buf.commit(&token, 2));

    assert_eq!(&*buf.get_recent_bases(&token, 3, 0, 2)[0].bytes, b"fresh");
    assert!(buf.get_recent_bases(&token, 3, 1, 2).is_empty());
}

#[test]
fn column_out_of_range_is_ignored() {
    let buf = InsertStagingBuffer::new(4);
    let (token, _) = buf.acquire(1, g(1), 2, 1);
    assert!(!buf.push(&token, 1, 1, bytes("x")));
    assert!(buf.get_recent_bases(&token, 2, 5, 2).is_empty());
    assert_eq!(buf.stats().ownership_mismatches, 0);
}

#[test]
fn populate_keeps_newest_depth_rows() {
    let buf = InsertStagingBuffer::new(4);
    let (token, _) = buf.acquire(1, g(1), 2, 1);
    let rows: Vec<StagedRow> = (1..=4)
        .rev()
        .map(|seq| StagedRow {
            seq,
            columns: vec![Some(bytes(&format!("r{seq}")))],
        })
        .collect();
    assert!(buf.populate(&token, rows));

    let bases = buf.get_recent_bases(&token, 5, 0, 2);
    assert_eq!(seqs(&bases), vec![4, 3]);
    assert_eq!(&*bases[1].bytes, b"r3");
}

// -------------------- Claims and ownership --------------------

#[test]
fn reacquire_returns_same_slot() {
    let buf = InsertStagingBuffer::new(4);
    let (first, is_new) = buf.acquire(1, g(1), 3, 1);
    assert!(is_new);
    stage(&buf, &first, 1, &["one"]);

    let (second, is_new) = buf.acquire(1, g(1), 3, 1);
    assert!(!is_new);
    assert_eq!(first, second);
    assert_eq!(buf.get_recent_bases(&second, 2, 0, 3).len(), 1);
}

#[test]
fn shape_change_starts_over() {
    let buf = InsertStagingBuffer::new(4);
    let (old, _) = buf.acquire(1, g(1), 3, 1);
    stage(&buf, &old, 1, &["one"]);

    let (token, is_new) = buf.acquire(1, g(1), 5, 1);
    assert!(is_new);
    assert!(buf.get_recent_bases(&token, 2, 0, 5).is_empty());
    assert!(!buf.is_current(&old));
}

#[test]
fn least_recently_active_slot_is_evicted() {
    let buf = InsertStagingBuffer::new(2);
    let (a, _) = buf.acquire(1, g(1), 2, 1);
    let (b, _) = buf.acquire(1, g(2), 2, 1);
    stage(&buf, &a, 1, &["a1"]);
    stage(&buf, &b, 1, &["b1"]);
    // Touch `a` again so `b` becomes the oldest.
    let (a, is_new) = buf.acquire(1, g(1), 2, 1);
    assert!(!is_new);

    let (c, is_new) = buf.acquire(1, g(3), 2, 1);
    assert!(is_new);
    assert_eq!(c.slot(), b.slot());
    assert!(buf.is_current(&a));
    assert!(!buf.is_current(&b));

    let stats = buf.stats();
    assert_eq!(stats.evicted_while_owned, 1);
    assert_eq!(stats.claimed, 2);
}

#[test]
fn stale_token_is_a_counted_no_op() {
    let buf = InsertStagingBuffer::new(1);
    let (a, _) = buf.acquire(1, g(1), 2, 1);
    stage(&buf, &a, 1, &["a1"]);
    let (b, _) = buf.acquire(1, g(2), 2, 1);
    stage(&buf, &b, 1, &["b1"]);

    assert!(!buf.push(&a, 2, 0, bytes("a2")));
    assert!(!buf.commit(&a, 2));
    assert!(buf.get_recent_bases(&a, 2, 0, 2).is_empty());
    assert!(!buf.populate(
        &a,
        vec![StagedRow {
            seq: 1,
            columns: vec![Some(bytes("a1"))]
        }]
    ));

    assert_eq!(buf.stats().ownership_mismatches, 4);
    assert!(STOLEN_SLOT.has_fired());
    // The thief's content is untouched.
    assert_eq!(&*buf.get_recent_bases(&b, 2, 0, 2)[0].bytes, b"b1");
}

#[test]
fn eviction_between_push_and_commit_drops_the_row() {
    let buf = InsertStagingBuffer::new(1);
    let (a, _) = buf.acquire(1, g(1), 2, 1);
    stage(&buf, &a, 1, &["a1"]);
    assert!(buf.push(&a, 2, 0, bytes("a2")));

    // Another group steals the only slot while seq 2 is pending.
    let _ = buf.acquire(1, g(2), 2, 1);
    assert!(!buf.commit(&a, 2));

    // Reclaiming hands back an empty ring, never the half-written row.
    let (again, is_new) = buf.acquire(1, g(1), 2, 1);
    assert!(is_new);
    assert_ne!(again, a);
    assert!(buf.get_recent_bases(&again, 3, 0, 2).is_empty());
}

#[test]
fn same_group_in_other_table_is_a_different_owner() {
    let buf = InsertStagingBuffer::new(4);
    let (t1, _) = buf.acquire(1, g(1), 2, 1);
    let (t2, is_new) = buf.acquire(2, g(1), 2, 1);
    assert!(is_new);
    assert_ne!(t1.slot(), t2.slot());
}

// -------------------- Invalidation --------------------

#[test]
fn invalidate_frees_only_that_table() {
    let buf = InsertStagingBuffer::new(8);
    let (a, _) = buf.acquire(1, g(1), 2, 1);
    let (b, _) = buf.acquire(1, g(2), 2, 1);
    let (other, _) = buf.acquire(2, g(1), 2, 1);
    for token in [&a, &b, &other] {
        stage(&buf, token, 1, &["v"]);
    }

    assert_eq!(buf.invalidate(1), 2);
    assert!(!buf.is_current(&a));
    assert!(!buf.is_current(&b));
    assert!(buf.is_current(&other));
    assert_eq!(buf.get_recent_bases(&other, 2, 0, 2).len(), 1);

    let stats = buf.stats();
    assert_eq!(stats.claimed, 1);
    assert_eq!(stats.regions, 1);
    assert_eq!(stats.evicted_while_owned, 0);

    let (fresh, is_new) = buf.acquire(1, g(1), 2, 1);
    assert!(is_new);
    assert!(buf.get_recent_bases(&fresh, 2, 0, 2).is_empty());
}

// -------------------- Arena --------------------

#[test]
fn released_region_handle_goes_stale() {
    let mut arena = Arena::default();
    let first = arena.alloc(2, 3);
    assert_eq!(arena.get(first).map(|r| r.content.len()), Some(6));

    arena.release(first);
    assert!(arena.get(first).is_none());
    assert_eq!(arena.live(), 0);

    let second = arena.alloc(4, 1);
    assert_ne!(first, second);
    assert!(arena.get(first).is_none());
    assert_eq!(arena.get(second).map(|r| r.depth), Some(4));
    // Double release is harmless.
    arena.release(first);
    assert_eq!(arena.live(), 1);
}
