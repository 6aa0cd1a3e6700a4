//! Deterministic placement for components that exist only in the declared
//! model (spec §4.6.1). Pure Rust, in-process — no Python subprocess calls.

use ksync_model::{Component, Position};

/// Millimeters between adjacent placement cells; one CAD grid unit, matching
/// the Matcher's own `Position::DEFAULT_TOLERANCE_MM`.
pub const GRID_SPACING_MM: f64 = Position::DEFAULT_TOLERANCE_MM;

/// Axis-aligned extent of a set of already-placed components, in millimeters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Bounding box over every already-placed component, or `None` if the sheet
/// has no placed components yet (fresh sheet — placement starts at the
/// origin).
pub fn bounding_box(existing: &[&Component]) -> Option<BoundingBox> {
    let mut placed = existing.iter().filter_map(|c| c.position);
    let first = placed.next()?;
    let mut bb = BoundingBox {
        min_x: first.x,
        min_y: first.y,
        max_x: first.x,
        max_y: first.y,
    };
    for p in placed {
        bb.min_x = bb.min_x.min(p.x);
        bb.min_y = bb.min_y.min(p.y);
        bb.max_x = bb.max_x.max(p.x);
        bb.max_y = bb.max_y.max(p.y);
    }
    Some(bb)
}

/// Rough footprint extent in millimeters, used only to size the placement
/// grid's row width — never written to CAD.
///
/// Grounded on the teacher's own footprint-name heuristics, extended with a
/// couple of common passive/connector patterns since this crate has no
/// access to the footprint library itself, only its name.
pub fn estimate_footprint_extent_mm(footprint: &str) -> (f64, f64) {
    if footprint.contains("0201") {
        (0.6, 0.3)
    } else if footprint.contains("0402") {
        (1.0, 0.5)
    } else if footprint.contains("0603") {
        (1.6, 0.8)
    } else if footprint.contains("0805") {
        (2.0, 1.25)
    } else if footprint.contains("1206") {
        (3.2, 1.6)
    } else if footprint.contains("SOT-23") {
        (3.0, 1.5)
    } else if footprint.contains("SOIC") {
        (5.0, 4.0)
    } else if footprint.contains("DIP") {
        (7.62, 9.0)
    } else {
        (5.0, 5.0)
    }
}

/// Grid placer for components that exist only in the declared model.
///
/// Placement is a pure function of the existing bounding box and the
/// *sorted* list of references awaiting placement — never of wall-clock
/// time, randomness, or insertion order — so re-running a sync with no
/// declaration changes reproduces byte-identical positions (spec's test
/// 17.2 guarantee).
#[derive(Debug, Clone, Copy)]
pub struct PlacementGrid {
    origin_x: f64,
    origin_y: f64,
    columns: usize,
    spacing: f64,
}

impl PlacementGrid {
    /// Starts a grid below `existing`'s bounding box (or at the origin, for
    /// an empty sheet), with as many columns as fit the existing width —
    /// at least one.
    pub fn below(existing: &[&Component]) -> Self {
        match bounding_box(existing) {
            Some(bb) => {
                let columns = ((bb.width() / GRID_SPACING_MM).floor() as usize).max(1);
                Self {
                    origin_x: bb.min_x,
                    origin_y: bb.max_y + GRID_SPACING_MM,
                    columns,
                    spacing: GRID_SPACING_MM,
                }
            }
            None => Self {
                origin_x: 0.0,
                origin_y: 0.0,
                columns: 8,
                spacing: GRID_SPACING_MM,
            },
        }
    }

    /// Position of the `index`-th fresh component (0-based), row-major.
    pub fn position_of(&self, index: usize) -> Position {
        let row = index / self.columns;
        let col = index % self.columns;
        Position::new(
            self.origin_x + col as f64 * self.spacing,
            self.origin_y + row as f64 * self.spacing,
            0.0,
        )
    }
}

/// Assigns a grid position to each reference in `pending`, in the order
/// given. Callers MUST pass `pending` already sorted (by `Reference`'s
/// natural-sort `Ord`) so the assignment is deterministic regardless of the
/// order components were declared or matched in.
pub fn place_fresh(existing: &[&Component], pending: &[ksync_model::Reference]) -> Vec<Position> {
    let grid = PlacementGrid::below(existing);
    (0..pending.len()).map(|i| grid.position_of(i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksync_model::{Component, Reference, SheetId};

    fn placed_at(x: f64, y: f64) -> Component {
        let mut c = Component::new(Reference::new("R1"), "Device:R", SheetId::new("s"));
        c.position = Some(Position::new(x, y, 0.0));
        c
    }

    #[test]
    fn empty_sheet_places_at_origin() {
        let grid = PlacementGrid::below(&[]);
        assert_eq!(grid.position_of(0), Position::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn places_below_existing_bounding_box() {
        let a = placed_at(0.0, 0.0);
        let b = placed_at(25.4, 12.7);
        let grid = PlacementGrid::below(&[&a, &b]);
        let p = grid.position_of(0);
        assert_eq!(p.x, 0.0);
        assert_eq!(p.y, 12.7 + GRID_SPACING_MM);
    }

    #[test]
    fn placement_is_deterministic_given_identical_inputs() {
        let a = placed_at(0.0, 0.0);
        let refs = vec![Reference::new("R2"), Reference::new("R3")];
        let first = place_fresh(&[&a], &refs);
        let second = place_fresh(&[&a], &refs);
        assert_eq!(first, second);
    }

    #[test]
    fn wraps_to_next_row_after_filling_existing_width() {
        let a = placed_at(0.0, 0.0);
        let b = placed_at(2.54, 0.0);
        let grid = PlacementGrid::below(&[&a, &b]);
        assert_eq!(grid.columns, 1);
        let first = grid.position_of(0);
        let second = grid.position_of(1);
        assert_eq!(first.x, second.x);
        assert!(second.y > first.y);
    }
}
