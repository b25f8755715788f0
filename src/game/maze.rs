//! Maze Geometry
//!
//! Compiled wall set for both layout kinds.
//!
//! ```text
//!   Grid layout                      Segments layout
//!   ###########                      explicit segments with thickness t
//!   #....#....#        compile       (capsules of radius t/2)
//!   #.##...##.#   ───────────────►   + 4 zero-thickness bound edges
//!   ###########
//!   boundary edges between wall and open cells, merged along each line
//! ```
//!
//! Every wall is a capsule: a segment plus a half-thickness. Collision and
//! ray queries in `collision` work on that single shape.

use serde::{Serialize, Deserialize};

use crate::config::{CapturePointConfig, ConfigError, FlagConfig, LayoutConfig};
use crate::core::vec2::{Vec2, EPSILON};

/// Open-space checks accept positions this close to a surface.
const OPEN_TOLERANCE: f64 = 1e-7;

// =============================================================================
// WALL SEGMENT
// =============================================================================

/// A wall: segment `start..end` inflated by `half_thickness`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WallSegment {
    pub start: Vec2,
    pub end: Vec2,
    pub half_thickness: f64,
}

impl WallSegment {
    pub const fn new(start: Vec2, end: Vec2, half_thickness: f64) -> Self {
        Self { start, end, half_thickness }
    }

    /// Closest point on the centre segment.
    pub fn closest_point(&self, point: Vec2) -> Vec2 {
        let ab = self.end - self.start;
        let len_sq = ab.length_squared();
        if len_sq < EPSILON * EPSILON {
            return self.start;
        }
        let t = ((point - self.start).dot(ab) / len_sq).clamp(0.0, 1.0);
        self.start + ab * t
    }

    /// Distance from `point` to the wall surface (negative inside).
    pub fn surface_distance(&self, point: Vec2) -> f64 {
        point.distance(self.closest_point(point)) - self.half_thickness
    }
}

// =============================================================================
// GRID CELLS
// =============================================================================

/// Wall/open bitmap for grid layouts.
#[derive(Clone, Debug, PartialEq)]
struct GridCells {
    cell_size: f64,
    cols: usize,
    rows: usize,
    /// Row-major, true = wall
    walls: Vec<bool>,
}

impl GridCells {
    fn parse(cell_size: f64, rows: &[String]) -> Result<Self, ConfigError> {
        let row_count = rows.len();
        let cols = rows.first().map(|r| r.chars().count()).unwrap_or(0);
        if row_count == 0 || cols == 0 {
            return Err(ConfigError::EmptyGrid);
        }

        let mut walls = Vec::with_capacity(row_count * cols);
        for (row, line) in rows.iter().enumerate() {
            let found = line.chars().count();
            if found != cols {
                return Err(ConfigError::RaggedGrid { row, expected: cols, found });
            }
            for (col, cell) in line.chars().enumerate() {
                match cell {
                    '#' => walls.push(true),
                    '.' => walls.push(false),
                    _ => return Err(ConfigError::UnknownCell { row, col, cell }),
                }
            }
        }

        Ok(Self { cell_size, cols, rows: row_count, walls })
    }

    /// Outside the grid counts as wall.
    fn is_wall(&self, col: i64, row: i64) -> bool {
        if col < 0 || row < 0 || col >= self.cols as i64 || row >= self.rows as i64 {
            return true;
        }
        self.walls[row as usize * self.cols + col as usize]
    }

    fn cell_of(&self, point: Vec2) -> (i64, i64) {
        (
            (point.x / self.cell_size).floor() as i64,
            (point.y / self.cell_size).floor() as i64,
        )
    }

    /// Boundary edges between wall and open cells, merged into maximal runs.
    fn boundary_edges(&self) -> Vec<WallSegment> {
        let s = self.cell_size;
        let mut edges = Vec::new();

        // Horizontal lines y = row·s, row in 0..=rows
        for row in 0..=self.rows as i64 {
            let mut run_start: Option<i64> = None;
            for col in 0..=self.cols as i64 {
                let boundary = col < self.cols as i64
                    && self.is_wall(col, row - 1) != self.is_wall(col, row);
                match (boundary, run_start) {
                    (true, None) => run_start = Some(col),
                    (false, Some(start)) => {
                        let y = row as f64 * s;
                        edges.push(WallSegment::new(
                            Vec2::new(start as f64 * s, y),
                            Vec2::new(col as f64 * s, y),
                            0.0,
                        ));
                        run_start = None;
                    }
                    _ => {}
                }
            }
        }

        // Vertical lines x = col·s, col in 0..=cols
        for col in 0..=self.cols as i64 {
            let mut run_start: Option<i64> = None;
            for row in 0..=self.rows as i64 {
                let boundary = row < self.rows as i64
                    && self.is_wall(col - 1, row) != self.is_wall(col, row);
                match (boundary, run_start) {
                    (true, None) => run_start = Some(row),
                    (false, Some(start)) => {
                        let x = col as f64 * s;
                        edges.push(WallSegment::new(
                            Vec2::new(x, start as f64 * s),
                            Vec2::new(x, row as f64 * s),
                            0.0,
                        ));
                        run_start = None;
                    }
                    _ => {}
                }
            }
        }

        edges
    }
}

// =============================================================================
// MAZE
// =============================================================================

/// Compiled maze geometry. Immutable after construction.
#[derive(Clone, Debug, PartialEq)]
pub struct Maze {
    walls: Vec<WallSegment>,
    min: Vec2,
    max: Vec2,
    grid: Option<GridCells>,
}

impl Maze {
    /// Compile a layout. Fails on ill-formed grids or degenerate bounds.
    pub fn from_layout(layout: &LayoutConfig) -> Result<Self, ConfigError> {
        match layout {
            LayoutConfig::Grid { cell_size, rows } => {
                if !cell_size.is_finite() || *cell_size <= 0.0 {
                    return Err(ConfigError::OutOfRange {
                        field: "layout.cell_size".to_string(),
                        requirement: "finite and > 0",
                        value: *cell_size,
                    });
                }
                let grid = GridCells::parse(*cell_size, rows)?;
                let min = Vec2::ZERO;
                let max = Vec2::new(grid.cols as f64 * cell_size, grid.rows as f64 * cell_size);

                let mut walls = grid.boundary_edges();
                walls.extend(bound_edges(min, max));
                Ok(Self { walls, min, max, grid: Some(grid) })
            }
            LayoutConfig::Segments { min, max, wall_thickness, walls } => {
                if !min.is_finite() || !max.is_finite() || max.x - min.x <= 0.0 || max.y - min.y <= 0.0 {
                    return Err(ConfigError::DegenerateBounds { min: *min, max: *max });
                }
                if !wall_thickness.is_finite() || *wall_thickness < 0.0 {
                    return Err(ConfigError::OutOfRange {
                        field: "layout.wall_thickness".to_string(),
                        requirement: "finite and >= 0",
                        value: *wall_thickness,
                    });
                }

                let half = wall_thickness * 0.5;
                let mut compiled = Vec::with_capacity(walls.len() + 4);
                for (i, wall) in walls.iter().enumerate() {
                    if !wall.start.is_finite() || !wall.end.is_finite() {
                        return Err(ConfigError::OutOfRange {
                            field: format!("layout.walls[{}]", i),
                            requirement: "finite",
                            value: f64::NAN,
                        });
                    }
                    compiled.push(WallSegment::new(wall.start, wall.end, half));
                }
                compiled.extend(bound_edges(*min, *max));
                Ok(Self { walls: compiled, min: *min, max: *max, grid: None })
            }
        }
    }

    /// All wall capsules, bounds included.
    pub fn walls(&self) -> &[WallSegment] {
        &self.walls
    }

    /// `(min, max)` corners of the playable area.
    pub fn bounds(&self) -> (Vec2, Vec2) {
        (self.min, self.max)
    }

    /// A circle of radius `clearance` centred at `point` touches no wall.
    ///
    /// With `clearance == 0` this is a plain point-in-open-space test.
    pub fn is_open(&self, point: Vec2, clearance: f64) -> bool {
        if !point.is_finite() {
            return false;
        }
        let clearance = clearance.max(0.0);

        let inside = point.x - clearance >= self.min.x - OPEN_TOLERANCE
            && point.x + clearance <= self.max.x + OPEN_TOLERANCE
            && point.y - clearance >= self.min.y - OPEN_TOLERANCE
            && point.y + clearance <= self.max.y + OPEN_TOLERANCE;
        if !inside {
            return false;
        }

        if let Some(grid) = &self.grid {
            let (col, row) = grid.cell_of(point);
            // Points exactly on the far bound belong to the last cell.
            let col = col.min(grid.cols as i64 - 1);
            let row = row.min(grid.rows as i64 - 1);
            if grid.is_wall(col, row) {
                return false;
            }
        }

        self.walls
            .iter()
            .all(|w| w.surface_distance(point) >= clearance - OPEN_TOLERANCE)
    }

    /// Distance from `point` to the nearest wall surface.
    pub fn nearest_wall_distance(&self, point: Vec2) -> f64 {
        self.walls
            .iter()
            .map(|w| w.surface_distance(point))
            .fold(f64::INFINITY, f64::min)
    }

    /// Classify the maze into square cells of `cell_size`.
    pub fn occupancy_grid(
        &self,
        cell_size: f64,
        flags: &[FlagConfig],
        capture_points: &[CapturePointConfig],
    ) -> OccupancyGrid {
        let extent = self.max - self.min;
        let cols = (extent.x / cell_size).ceil().max(1.0) as usize;
        let rows = (extent.y / cell_size).ceil().max(1.0) as usize;

        let mut cells = Vec::with_capacity(cols * rows);
        for row in 0..rows {
            for col in 0..cols {
                let lo = self.min + Vec2::new(col as f64 * cell_size, row as f64 * cell_size);
                let hi = lo + Vec2::new(cell_size, cell_size);
                let centre = lo.lerp(hi, 0.5);

                let in_cell = |p: Vec2| p.x >= lo.x && p.x < hi.x && p.y >= lo.y && p.y < hi.y;

                // Wall if a surface cuts the cell's inscribed circle.
                let kind = if !self.is_open(centre, 0.0) || self.nearest_wall_distance(centre) < cell_size * 0.5 {
                    CellKind::Wall
                } else if flags.iter().any(|f| in_cell(f.home)) {
                    CellKind::Flag
                } else if capture_points
                    .iter()
                    .any(|c| centre.distance_squared(c.position) <= c.radius * c.radius)
                {
                    CellKind::CapturePoint
                } else {
                    CellKind::Free
                };
                cells.push(kind);
            }
        }

        OccupancyGrid { origin: self.min, cell_size, cols, rows, cells }
    }
}

fn bound_edges(min: Vec2, max: Vec2) -> [WallSegment; 4] {
    let a = Vec2::new(min.x, min.y);
    let b = Vec2::new(max.x, min.y);
    let c = Vec2::new(max.x, max.y);
    let d = Vec2::new(min.x, max.y);
    [
        WallSegment::new(a, b, 0.0),
        WallSegment::new(b, c, 0.0),
        WallSegment::new(c, d, 0.0),
        WallSegment::new(d, a, 0.0),
    ]
}

// =============================================================================
// OCCUPANCY GRID
// =============================================================================

/// Contents of one occupancy cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellKind {
    Free,
    Wall,
    Flag,
    CapturePoint,
}

/// Static classification of the maze, shared read-only with agents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OccupancyGrid {
    origin: Vec2,
    cell_size: f64,
    cols: usize,
    rows: usize,
    /// Row-major from `origin`
    cells: Vec<CellKind>,
}

impl OccupancyGrid {
    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Cell at `(col, row)`.
    pub fn get(&self, col: usize, row: usize) -> Option<CellKind> {
        if col >= self.cols || row >= self.rows {
            return None;
        }
        self.cells.get(row * self.cols + col).copied()
    }

    /// Cell containing a world position.
    pub fn at(&self, point: Vec2) -> Option<CellKind> {
        let local = point - self.origin;
        if local.x < 0.0 || local.y < 0.0 {
            return None;
        }
        self.get(
            (local.x / self.cell_size) as usize,
            (local.y / self.cell_size) as usize,
        )
    }

    /// Centre of `(col, row)` in world space.
    pub fn cell_center(&self, col: usize, row: usize) -> Vec2 {
        self.origin + Vec2::new((col as f64 + 0.5) * self.cell_size, (row as f64 + 0.5) * self.cell_size)
    }
}

// =============================================================================
// TESTS
// =============================================================================
