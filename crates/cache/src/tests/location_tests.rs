use crate::{Location, LocationIndex};
use grouphash::hash_bytes;

#[test]
fn record_populates_both_directions() {
    let index = LocationIndex::new(16);
    let g = hash_bytes(b"g");
    index.record(1, Location::new(0x10), g, 3);

    assert_eq!(index.seq_at(1, Location::new(0x10)), Some(3));
    assert_eq!(index.location_of(1, g, 3), Some(Location::new(0x10)));
    assert_eq!(index.location_of(1, g, 4), None);
    assert_eq!(index.seq_at(2, Location::new(0x10)), None);
}

#[test]
fn forget_drops_single_direction() {
    let index = LocationIndex::new(16);
    let g = hash_bytes(b"g");
    index.record(1, Location::new(7), g, 1);

    index.forget_reverse(1, g, 1);
    assert_eq!(index.location_of(1, g, 1), None);
    assert_eq!(index.seq_at(1, Location::new(7)), Some(1));

    index.forget_forward(1, Location::new(7));
    assert_eq!(index.seq_at(1, Location::new(7)), None);
}

#[test]
fn invalidate_leaves_other_tables() {
    let index = LocationIndex::new(64);
    let g = hash_bytes(b"g");
    for seq in 1..=5 {
        index.record(1, Location::new(seq), g, seq);
        index.record(2, Location::new(seq), g, seq);
    }

    assert_eq!(index.invalidate(1), 10);
    for seq in 1..=5 {
        assert_eq!(index.seq_at(1, Location::new(seq)), None);
        assert_eq!(index.location_of(1, g, seq), None);
        assert_eq!(index.seq_at(2, Location::new(seq)), Some(seq));
        assert_eq!(index.location_of(2, g, seq), Some(Location::new(seq)));
    }
}

#[test]
fn directions_evict_independently() {
    let index = LocationIndex::new(2);
    let g = hash_bytes(b"g");
    index.record(1, Location::new(1), g, 1);
    index.record(1, Location::new(2), g, 2);

    // Touch the reverse entry for seq 1 only; the forward side keeps its order.
    assert!(index.location_of(1, g, 1).is_some());
    index.record(1, Location::new(3), g, 3);

    assert_eq!(index.location_of(1, g, 1), Some(Location::new(1)));
    assert_eq!(index.location_of(1, g, 2), None);
    assert_eq!(index.seq_at(1, Location::new(1)), None);
    assert_eq!(index.seq_at(1, Location::new(2)), Some(2));

    let stats = index.stats();
    assert_eq!(stats.forward.evictions, 1);
    assert_eq!(stats.reverse.evictions, 1);
}

#[test]
fn budget_covers_both_directions() {
    let mib = 1024 * 1024;
    let stats = LocationIndex::with_budget_mb(1).stats();
    assert_eq!(stats.forward.capacity, stats.reverse.capacity);

    let rows = stats.forward.capacity;
    assert!(rows > 0);
    assert!(rows * LocationIndex::entry_footprint() <= mib);
    assert!((rows + 1) * LocationIndex::entry_footprint() > mib);
}
