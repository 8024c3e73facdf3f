use thiserror::Error;

pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("cell size must be non-zero (got {cell_width}x{cell_height})")]
    ZeroCellSize { cell_width: u32, cell_height: u32 },
}

/// Character grid the backend PTY renders to.
///
/// Both dimensions are at least one. Constructors clamp rather than fail so
/// a zero or negative measurement can never reach the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewportGeometry {
    cols: u16,
    rows: u16,
}

impl ViewportGeometry {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols: cols.max(1),
            rows: rows.max(1),
        }
    }

    /// Accepts measurements in a wider signed type and clamps into `1..=u16::MAX`.
    pub fn clamped(cols: i64, rows: i64) -> Self {
        let clamp = |value: i64| value.clamp(1, u16::MAX as i64) as u16;
        Self {
            cols: clamp(cols),
            rows: clamp(rows),
        }
    }

    /// Derives the grid that fits a pixel surface, flooring partial cells.
    pub fn fit_pixels(
        width_px: u32,
        height_px: u32,
        cell_width: u32,
        cell_height: u32,
    ) -> Result<Self, GeometryError> {
        if cell_width == 0 || cell_height == 0 {
            return Err(GeometryError::ZeroCellSize {
                cell_width,
                cell_height,
            });
        }
        Ok(Self::clamped(
            (width_px / cell_width) as i64,
            (height_px / cell_height) as i64,
        ))
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }
}

impl Default for ViewportGeometry {
    fn default() -> Self {
        Self::new(DEFAULT_COLS, DEFAULT_ROWS)
    }
}

impl std::fmt::Display for ViewportGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}
