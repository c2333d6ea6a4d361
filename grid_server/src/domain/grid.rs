// Dense cell matrix with the toggle rules. Not synchronized; see `use_cases::grid_store`.

use super::cell::{ActiveCell, CellChange, CellState, GridSnapshot, PaletteColor};

pub struct Grid {
    size: u32,
    // Row-major: index = y * size + x.
    cells: Vec<CellState>,
}

impl Grid {
    /// Allocates a `size` x `size` grid with every cell inactive.
    pub fn new(size: u32) -> Self {
        let len = (size as usize) * (size as usize);
        Self {
            size,
            cells: vec![CellState::Inactive; len],
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Maps signed coordinates to a cell index, rejecting anything outside `[0, size)`.
    fn index(&self, x: i64, y: i64) -> Option<usize> {
        let size = i64::from(self.size);
        if (0..size).contains(&x) && (0..size).contains(&y) {
            Some((y * size + x) as usize)
        } else {
            None
        }
    }

    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        self.index(x, y).is_some()
    }

    pub fn get(&self, x: i64, y: i64) -> CellState {
        self.index(x, y)
            .map(|i| self.cells[i])
            .unwrap_or(CellState::Inactive)
    }

    /// Returns false when the coordinates were out of range and nothing was written.
    pub fn set(&mut self, x: i64, y: i64, state: CellState) -> bool {
        match self.index(x, y) {
            Some(i) => {
                self.cells[i] = state;
                true
            }
            None => false,
        }
    }

    /// Flips a cell. Turning a cell off erases its color.
    pub fn toggle(&mut self, x: i64, y: i64, color: PaletteColor) -> Option<CellChange> {
        let i = self.index(x, y)?;
        let next = match self.cells[i] {
            CellState::Inactive => CellState::Active(color),
            CellState::Active(_) => CellState::Inactive,
        };
        self.cells[i] = next;
        Some(CellChange {
            x: x as u32,
            y: y as u32,
            state: next,
        })
    }

    pub fn snapshot(&self) -> GridSnapshot {
        let size = self.size as usize;
        let active = self
            .cells
            .iter()
            .enumerate()
            .filter_map(|(i, state)| {
                state.color().map(|color| ActiveCell {
                    x: (i % size) as u32,
                    y: (i / size) as u32,
                    color,
                })
            })
            .collect();
        GridSnapshot {
            size: self.size,
            active,
        }
    }

    pub fn active_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_active()).count()
    }
}
