// Viewer-side copy of the grid, rebuilt from every snapshot and patched by deltas.

use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalReplica {
    size: u32,
    // Active cells only; absent means unset.
    cells: HashMap<(u32, u32), String>,
}

impl LocalReplica {
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn active_count(&self) -> usize {
        self.cells.len()
    }

    /// Color of an active cell, `None` when the cell is unset.
    pub fn get(&self, x: u32, y: u32) -> Option<&str> {
        self.cells.get(&(x, y)).map(String::as_str)
    }

    /// Discards everything and adopts the snapshot wholesale.
    pub fn replace(&mut self, size: u32, active: Vec<(u32, u32, String)>) {
        self.size = size;
        self.cells = active
            .into_iter()
            .filter(|(x, y, _)| *x < size && *y < size)
            .map(|(x, y, color)| ((x, y), color))
            .collect();
    }

    /// Applies one authoritative delta; deltas carry absolute state, so reapplying is harmless.
    pub fn apply(&mut self, x: u32, y: u32, active: bool, color: String) {
        if x >= self.size || y >= self.size {
            return;
        }
        if active {
            self.cells.insert((x, y), color);
        } else {
            self.cells.remove(&(x, y));
        }
    }

    /// Active cells sorted by position.
    pub fn active_cells(&self) -> Vec<(u32, u32, String)> {
        let mut cells: Vec<_> = self
            .cells
            .iter()
            .map(|(&(x, y), color)| (x, y, color.clone()))
            .collect();
        cells.sort();
        cells
    }
}
