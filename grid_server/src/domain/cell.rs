// Cell state and the fixed color palette.

use std::fmt;

/// Canonical color reported for inactive cells.
pub const UNSET_COLOR: &str = "#FFFFFF";

/// Colors a cell may carry while active.
///
/// White is deliberately absent: `#FFFFFF` is the unset value and is never a valid paint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaletteColor {
    Black,
    Gray,
    Silver,
    Red,
    Maroon,
    Orange,
    Yellow,
    Olive,
    Lime,
    Green,
    Teal,
    Cyan,
    Blue,
    Navy,
    Purple,
    Magenta,
}

impl PaletteColor {
    /// Substituted when a request carries no color or an unknown one.
    pub const DEFAULT: PaletteColor = PaletteColor::Black;

    pub const ALL: [PaletteColor; 16] = [
        PaletteColor::Black,
        PaletteColor::Gray,
        PaletteColor::Silver,
        PaletteColor::Red,
        PaletteColor::Maroon,
        PaletteColor::Orange,
        PaletteColor::Yellow,
        PaletteColor::Olive,
        PaletteColor::Lime,
        PaletteColor::Green,
        PaletteColor::Teal,
        PaletteColor::Cyan,
        PaletteColor::Blue,
        PaletteColor::Navy,
        PaletteColor::Purple,
        PaletteColor::Magenta,
    ];

    pub fn hex(self) -> &'static str {
        match self {
            PaletteColor::Black => "#000000",
            PaletteColor::Gray => "#808080",
            PaletteColor::Silver => "#C0C0C0",
            PaletteColor::Red => "#FF0000",
            PaletteColor::Maroon => "#800000",
            PaletteColor::Orange => "#FF8000",
            PaletteColor::Yellow => "#FFFF00",
            PaletteColor::Olive => "#808000",
            PaletteColor::Lime => "#00FF00",
            PaletteColor::Green => "#008000",
            PaletteColor::Teal => "#008080",
            PaletteColor::Cyan => "#00FFFF",
            PaletteColor::Blue => "#0000FF",
            PaletteColor::Navy => "#000080",
            PaletteColor::Purple => "#800080",
            PaletteColor::Magenta => "#FF00FF",
        }
    }

    /// Parses a `#RRGGBB` string, ignoring case and surrounding whitespace.
    pub fn parse(value: &str) -> Option<PaletteColor> {
        let value = value.trim();
        PaletteColor::ALL
            .into_iter()
            .find(|color| color.hex().eq_ignore_ascii_case(value))
    }

    /// Resolves an optional requested color, falling back to [`PaletteColor::DEFAULT`].
    pub fn or_default(value: Option<&str>) -> PaletteColor {
        value
            .and_then(PaletteColor::parse)
            .unwrap_or(PaletteColor::DEFAULT)
    }
}

impl fmt::Display for PaletteColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hex())
    }
}

/// State of a single cell. An inactive cell has no color by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CellState {
    #[default]
    Inactive,
    Active(PaletteColor),
}

impl CellState {
    pub fn from_parts(active: bool, color: PaletteColor) -> Self {
        if active {
            CellState::Active(color)
        } else {
            CellState::Inactive
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, CellState::Active(_))
    }

    pub fn color(self) -> Option<PaletteColor> {
        match self {
            CellState::Active(color) => Some(color),
            CellState::Inactive => None,
        }
    }

    /// Wire color: the palette hex when active, [`UNSET_COLOR`] otherwise.
    pub fn color_hex(self) -> &'static str {
        self.color().map(PaletteColor::hex).unwrap_or(UNSET_COLOR)
    }
}

/// One committed cell change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellChange {
    pub x: u32,
    pub y: u32,
    pub state: CellState,
}

/// An active cell as listed in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveCell {
    pub x: u32,
    pub y: u32,
    pub color: PaletteColor,
}

/// Sparse point-in-time view of the grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridSnapshot {
    pub size: u32,
    pub active: Vec<ActiveCell>,
}
