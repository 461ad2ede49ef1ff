//! Region arena backing claimed staging slots.
//!
//! Slot headers stay small and fixed in number; the `depth x columns` content
//! grid of a slot lives in a [`Region`] allocated here only once the slot is
//! claimed. Headers refer to regions through a [`RegionHandle`] (index plus
//! generation), so a handle kept across a release never resolves to a region
//! that has since been handed to another slot.
use std::sync::Arc;

use grouphash::Seq;

/// Stable reference to a region in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RegionHandle {
    index: u32,
    generation: u32,
}

/// Ring storage of one slot.
#[derive(Debug)]
pub(crate) struct Region {
    pub(crate) depth: usize,
    pub(crate) cols: usize,
    /// Sequence written at each ring position.
    pub(crate) seqs: Vec<Seq>,
    /// Whether the position holds a committed row.
    pub(crate) committed: Vec<bool>,
    /// `depth x cols`, row-major by ring position.
    pub(crate) content: Vec<Option<Arc<[u8]>>>,
}

impl Region {
    fn new(depth: usize, cols: usize) -> Self {
        Self {
            depth,
            cols,
            seqs: vec![0; depth],
            committed: vec![false; depth],
            content: vec![None; depth * cols],
        }
    }

    pub(crate) fn cell(&self, pos: usize, col: usize) -> Option<&Arc<[u8]>> {
        self.content[pos * self.cols + col].as_ref()
    }

    pub(crate) fn set_cell(&mut self, pos: usize, col: usize, bytes: Arc<[u8]>) {
        self.content[pos * self.cols + col] = Some(bytes);
    }

    /// Empties a ring position. Returns whether it held a committed row.
    pub(crate) fn clear_position(&mut self, pos: usize) -> bool {
        let start = pos * self.cols;
        for cell in &mut self.content[start..start + self.cols] {
            *cell = None;
        }
        self.seqs[pos] = 0;
        std::mem::replace(&mut self.committed[pos], false)
    }
}

#[derive(Debug, Default)]
struct Cell {
    generation: u32,
    region: Option<Region>,
}

/// Growable pool of regions with a free list of vacated cells.
#[derive(Debug, Default)]
pub(crate) struct Arena {
    cells: Vec<Cell>,
    free: Vec<u32>,
}

impl Arena {
    pub(crate) fn alloc(&mut self, depth: usize, cols: usize) -> RegionHandle {
        let region = Region::new(depth, cols);
        match self.free.pop() {
            Some(index) => {
                let cell = &mut self.cells[index as usize];
                cell.region = Some(region);
                RegionHandle {
                    index,
                    generation: cell.generation,
                }
            }
            None => {
                let index = self.cells.len() as u32;
                self.cells.push(Cell {
                    generation: 0,
                    region: Some(region),
                });
                RegionHandle {
                    index,
                    generation: 0,
                }
            }
        }
    }

    /// Frees the region and invalidates every outstanding handle to it.
    pub(crate) fn release(&mut self, handle: RegionHandle) {
        if let Some(cell) = self.cells.get_mut(handle.index as usize) {
            if cell.generation == handle.generation && cell.region.is_some() {
                cell.region = None;
                cell.generation = cell.generation.wrapping_add(1);
                self.free.push(handle.index);
            }
        }
    }

    pub(crate) fn get(&self, handle: RegionHandle) -> Option<&Region> {
        self.cells
            .get(handle.index as usize)
            .filter(|cell| cell.generation == handle.generation)
            .and_then(|cell| cell.region.as_ref())
    }

    pub(crate) fn get_mut(&mut self, handle: RegionHandle) -> Option<&mut Region> {
        self.cells
            .get_mut(handle.index as usize)
            .filter(|cell| cell.generation == handle.generation)
            .and_then(|cell| cell.region.as_mut())
    }

    /// Number of regions currently allocated.
    pub(crate) fn live(&self) -> usize {
        self.cells.len() - self.free.len()
    }
}
