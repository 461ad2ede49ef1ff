use super::helpers::*;
use crate::*;
use anyhow::Result;

#[test]
fn autocommit_inserts_update_stats() -> Result<()> {
    let h = Harness::new()?;
    let out = h.fill("alpha", 5)?;

    let stats = h.db.group_stats(TABLE, &key("alpha"))?.expect("stats recorded");
    assert_eq!(stats.rows, 5);
    assert_eq!(stats.keyframes, COLUMNS as u64);
    assert_eq!(stats.max_seq, 5);
    assert_eq!(
        stats.raw_bytes,
        out.iter().map(|o| o.raw_bytes as u64).sum::<u64>()
    );
    assert_eq!(
        stats.stored_bytes,
        out.iter().map(|o| o.stored_bytes as u64).sum::<u64>()
    );
    assert!(stats.ratio() < 0.5);
    assert_eq!(h.db.group_stats(TABLE, &key("nobody"))?, None);
    Ok(())
}

#[test]
fn transaction_publishes_on_commit() -> Result<()> {
    let h = Harness::new()?;
    let mut tx = h.db.begin();
    for seq in 1..=3 {
        tx.insert(TABLE, &key("a"), row("a", seq))?;
    }
    tx.insert(TABLE, &key("b"), row("b", 1))?;

    assert_eq!(tx.accumulator().len(), 2);
    assert_eq!(h.db.group_stats(TABLE, &key("a"))?, None);

    let group = h.db.group_hash(&key("a"))?;
    assert_eq!(tx.accumulator().pending(TABLE, group).map(|s| s.rows), Some(3));

    assert_eq!(tx.commit(), 2);
    assert_eq!(h.db.group_stats(TABLE, &key("a"))?.map(|s| s.rows), Some(3));
    assert_eq!(h.db.group_stats(TABLE, &key("b"))?.map(|s| s.rows), Some(1));
    Ok(())
}

#[test]
fn committed_stats_merge_with_earlier_ones() -> Result<()> {
    let h = Harness::new()?;
    h.fill("a", 2)?;

    let mut tx = h.db.begin();
    tx.insert(TABLE, &key("a"), row("a", 3))?;
    tx.commit();

    let stats = h.db.group_stats(TABLE, &key("a"))?.expect("stats recorded");
    assert_eq!(stats.rows, 3);
    assert_eq!(stats.max_seq, 3);
    Ok(())
}

#[test]
fn abort_discards_stats_but_keeps_rows() -> Result<()> {
    let h = Harness::new()?;
    let mut tx = h.db.begin();
    tx.insert(TABLE, &key("a"), row("a", 1))?;
    tx.insert(TABLE, &key("a"), row("a", 2))?;
    tx.abort();

    assert_eq!(h.db.group_stats(TABLE, &key("a"))?, None);
    assert_eq!(h.rows.row_count(TABLE), 2);
    assert_eq!(h.db.latest_seq(TABLE, &key("a"))?, Some(2));
    Ok(())
}

#[test]
fn dropped_transaction_behaves_like_abort() -> Result<()> {
    let h = Harness::new()?;
    {
        let mut tx = h.db.begin();
        tx.insert(TABLE, &key("a"), row("a", 1))?;
    }
    assert_eq!(h.db.group_stats(TABLE, &key("a"))?, None);
    Ok(())
}

#[test]
fn failed_insert_is_not_accumulated() -> Result<()> {
    let h = Harness::new()?;
    let mut tx = h.db.begin();
    h.rows.fail_next_appends(1);
    assert!(tx.insert(TABLE, &key("a"), row("a", 1)).is_err());
    assert!(tx.accumulator().is_empty());
    assert_eq!(tx.commit(), 0);
    Ok(())
}

#[test]
fn truncate_forgets_stats() -> Result<()> {
    let h = Harness::new()?;
    h.fill("a", 2)?;
    h.db.truncate(TABLE)?;
    assert_eq!(h.db.group_stats(TABLE, &key("a"))?, None);
    Ok(())
}
