/// Command interpreter behind the interactive shell.
///
/// Every command works on a single one-column table. Group keys are text and
/// values are the rest of the line after the group.

use std::fs;
use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use codec::Tag;
use config::{CacheConfig, DeltaConfig};
use engine::{CacheService, DeltaStore, DiffCodec, InsertOutcome, MemRowStore};
use grouphash::{KeyValue, TableId};
use tracing::{debug, warn};

pub const TABLE: TableId = 1;

pub struct Shell {
    rows: Arc<MemRowStore>,
    db: DeltaStore,
}

/// What the loop should do after a command.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

impl Shell {
    pub fn new(cache: CacheConfig, delta: DeltaConfig) -> Result<Self> {
        let service = CacheService::new(cache)?;
        let rows = Arc::new(MemRowStore::new());
        let db = DeltaStore::new(service, rows.clone(), Arc::new(DiffCodec::new()));
        db.create_table(TABLE, 1, delta)?;
        Ok(Self { rows, db })
    }

    pub fn store(&self) -> &DeltaStore {
        &self.db
    }

    /// Reads commands from `input` until EOF or `EXIT`, writing replies and
    /// prompts to `out`.
    pub fn run<R: BufRead, W: Write>(&self, input: R, out: &mut W) -> Result<()> {
        write!(out, "> ")?;
        out.flush()?;
        for line in input.lines() {
            let line = line?;
            if self.execute(&line, out)? == Flow::Exit {
                break;
            }
            write!(out, "> ")?;
            out.flush()?;
        }
        self.db.service().detach();
        Ok(())
    }

    /// Runs one command line. Command failures are reported to `out`; only
    /// a failed write to `out` is returned as an error.
    pub fn execute<W: Write>(&self, line: &str, out: &mut W) -> Result<Flow> {
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else {
            return Ok(Flow::Continue);
        };
        match cmd.to_uppercase().as_str() {
            "INSERT" => match split_row(&line.trim_start()[cmd.len()..]) {
                Some((group, value)) => {
                    match self.db.insert(TABLE, &group_key(group), vec![value.as_bytes().to_vec()]) {
                        Ok(outcome) => writeln!(out, "{}", describe(&outcome))?,
                        Err(e) => writeln!(out, "ERR insert failed: {e:#}")?,
                    }
                }
                None => writeln!(out, "ERR usage: INSERT group value")?,
            },
            "GET" => match (parts.next(), parts.next().map(str::parse::<u64>)) {
                (Some(group), Some(Ok(seq))) => {
                    match self.db.get_column(TABLE, &group_key(group), seq, 0) {
                        Ok(Some(value)) => writeln!(out, "{}", String::from_utf8_lossy(&value))?,
                        Ok(None) => writeln!(out, "(nil)")?,
                        Err(e) => writeln!(out, "ERR read failed: {e:#}")?,
                    }
                }
                _ => writeln!(out, "ERR usage: GET group seq")?,
            },
            "LATEST" => match parts.next() {
                Some(group) => match self.db.latest_seq(TABLE, &group_key(group)) {
                    Ok(Some(seq)) => writeln!(out, "{seq}")?,
                    Ok(None) => writeln!(out, "(nil)")?,
                    Err(e) => writeln!(out, "ERR read failed: {e:#}")?,
                },
                None => writeln!(out, "ERR usage: LATEST group")?,
            },
            "HISTORY" => match parts.next() {
                Some(group) => match self.db.history(TABLE, &group_key(group)) {
                    Ok(seqs) if seqs.is_empty() => writeln!(out, "(empty)")?,
                    Ok(seqs) => {
                        let list: Vec<String> = seqs.iter().map(u64::to_string).collect();
                        writeln!(out, "{} ({} versions)", list.join(" "), seqs.len())?;
                    }
                    Err(e) => writeln!(out, "ERR read failed: {e:#}")?,
                },
                None => writeln!(out, "ERR usage: HISTORY group")?,
            },
            "TRUNCATE" => match self.db.truncate(TABLE) {
                Ok(dropped) => writeln!(out, "OK ({} cache entries dropped)", dropped.total())?,
                Err(e) => writeln!(out, "ERR truncate failed: {e:#}")?,
            },
            "LOAD" => match parts.next() {
                Some(path) => match self.load(path) {
                    Ok((rows, groups)) => writeln!(out, "OK ({rows} rows, {groups} groups)")?,
                    Err(e) => writeln!(out, "ERR load failed: {e:#}")?,
                },
                None => writeln!(out, "ERR usage: LOAD path")?,
            },
            "STATS" => {
                writeln!(out, "{}", self.db.service().metrics())?;
                writeln!(
                    out,
                    "table {TABLE}: rows={} stored={}B",
                    self.rows.row_count(TABLE),
                    self.rows.stored_bytes(TABLE)
                )?;
            }
            "EXIT" | "QUIT" => {
                writeln!(out, "bye")?;
                return Ok(Flow::Exit);
            }
            other => writeln!(out, "unknown command: {other}")?,
        }
        Ok(Flow::Continue)
    }

    /// Inserts every `group value...` line of `path` in one transaction.
    ///
    /// Statistics are published only if every line loads.
    fn load(&self, path: &str) -> Result<(usize, usize)> {
        let text = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        let mut tx = self.db.begin();
        let mut rows = 0;
        for (n, line) in text.lines().enumerate() {
            let Some((group, value)) = split_row(line) else {
                continue;
            };
            if group.starts_with('#') {
                continue;
            }
            if let Err(e) = tx.insert(TABLE, &group_key(group), vec![value.as_bytes().to_vec()]) {
                warn!(path, line = n + 1, "load stopped");
                tx.abort();
                return Err(e.context(format!("{path}:{}", n + 1)));
            }
            rows += 1;
        }
        let groups = tx.commit();
        debug!(path, rows, groups, "load committed");
        Ok((rows, groups))
    }
}

/// Splits `group value...` into the group and the rest of the line, keeping
/// the value's inner whitespace.
fn split_row(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (group, value) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    Some((group, value.trim()))
}

fn group_key(group: &str) -> KeyValue {
    KeyValue::Text(group.to_string())
}

fn describe(outcome: &InsertOutcome) -> String {
    let tag = match outcome.tags.first() {
        Some(Tag::Back(n)) => format!("diff -{n}"),
        _ => "keyframe".to_string(),
    };
    format!(
        "OK seq={} {tag} ({}B -> {}B)",
        outcome.seq, outcome.raw_bytes, outcome.stored_bytes
    )
}
