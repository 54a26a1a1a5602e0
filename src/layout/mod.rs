//! Layout module - deterministic placement of steps on the canvas.
//!
//! Steps are grouped into columns by the major ordinal of their id and the
//! columns are laid out left to right. Two modes:
//!
//! - **Sequence-aligned**: each column is stacked top-down by minor ordinal
//!   from a common baseline.
//! - **Centered**: the first step defines a horizontal centerline. Single
//!   steps are centered on it; parallel steps go above (odd slot) or below
//!   (even slot), closest slot first.
//!
//! Standalone (addendum) steps are kept out of the columns and hang one row
//! gap beneath their anchor step, linked by a dashed edge.
//!
//! Output depends only on the input steps and mode: no randomness, no prior
//! layout state. Coordinates are whole multiples of the grid unit.

mod edges;
mod sizing;

pub use sizing::{card_size, CardSize, BASELINE_X, BASELINE_Y, COLUMN_GAP, ROW_GAP};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::procedure::{canonical_order, Edge, EdgeKind, Position, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutMode {
    #[default]
    SequenceAligned,
    Centered,
}

impl LayoutMode {
    /// Parse a mode name as used in configuration and on the command line.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sequence" | "sequence-aligned" | "flow" => Some(Self::SequenceAligned),
            "centered" | "centre" | "center" => Some(Self::Centered),
            _ => None,
        }
    }
}

impl std::fmt::Display for LayoutMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutMode::SequenceAligned => write!(f, "sequence-aligned"),
            LayoutMode::Centered => write!(f, "centered"),
        }
    }
}

/// Computed positions and edges.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layout {
    pub positions: BTreeMap<String, Position>,
    pub edges: Vec<Edge>,
}

/// A column of mutually parallel steps (indices into the step slice),
/// ordered by minor ordinal.
#[derive(Debug, Clone)]
struct Column {
    members: Vec<usize>,
}

/// Card rectangle in grid units.
#[derive(Debug, Clone, Copy)]
struct Cell {
    x: i64,
    y: i64,
    size: CardSize,
}

impl Cell {
    fn bottom(&self) -> i64 {
        self.y + self.size.height
    }
}

/// Compute positions for every step and the edges between them.
pub fn layout(steps: &[Step], mode: LayoutMode, grid_unit: u32) -> Layout {
    let unit = i64::from(grid_unit.max(1));
    let columns = build_columns(steps);
    let mut cells: BTreeMap<usize, Cell> = BTreeMap::new();

    let xs = column_offsets(steps, &columns);
    match mode {
        LayoutMode::SequenceAligned => place_sequence(steps, &columns, &xs, &mut cells),
        LayoutMode::Centered => place_centered(steps, &columns, &xs, &mut cells),
    }

    let mut edges = edges::column_edges(steps, &columns);
    edges.extend(place_standalone(steps, &columns, &mut cells));

    let positions = cells
        .iter()
        .map(|(&i, cell)| {
            (
                steps[i].id.clone(),
                Position::new(cell.x * unit, cell.y * unit),
            )
        })
        .collect();

    tracing::debug!(
        mode = %mode,
        steps = steps.len(),
        columns = columns.len(),
        edges = edges.len(),
        "Computed layout"
    );

    Layout { positions, edges }
}

/// Copy computed positions onto the steps.
pub fn apply_layout(steps: &mut [Step], layout: &Layout) {
    for step in steps {
        if let Some(position) = layout.positions.get(&step.id) {
            step.position = *position;
        }
    }
}

fn build_columns(steps: &[Step]) -> Vec<Column> {
    let mut by_major: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for i in canonical_order(steps) {
        if steps[i].is_standalone() {
            continue;
        }
        by_major
            .entry(steps[i].ordinal_lenient().major)
            .or_default()
            .push(i);
    }
    by_major
        .into_values()
        .map(|members| Column { members })
        .collect()
}

fn column_offsets(steps: &[Step], columns: &[Column]) -> Vec<i64> {
    let mut xs = Vec::with_capacity(columns.len());
    let mut x = BASELINE_X;
    for column in columns {
        xs.push(x);
        let width = column
            .members
            .iter()
            .map(|&i| card_size(steps[i].tasks.len()).width)
            .max()
            .unwrap_or(0);
        x += width + COLUMN_GAP;
    }
    xs
}

fn place_sequence(
    steps: &[Step],
    columns: &[Column],
    xs: &[i64],
    cells: &mut BTreeMap<usize, Cell>,
) {
    for (column, &x) in columns.iter().zip(xs) {
        let mut y = BASELINE_Y;
        for &i in &column.members {
            let size = card_size(steps[i].tasks.len());
            cells.insert(i, Cell { x, y, size });
            y += size.height + ROW_GAP;
        }
    }
}

fn place_centered(
    steps: &[Step],
    columns: &[Column],
    xs: &[i64],
    cells: &mut BTreeMap<usize, Cell>,
) {
    let Some(&anchor) = columns.first().and_then(|c| c.members.first()) else {
        return;
    };
    let center = BASELINE_Y + card_size(steps[anchor].tasks.len()).height / 2;

    for (column, &x) in columns.iter().zip(xs) {
        if let [only] = column.members.as_slice() {
            let size = card_size(steps[*only].tasks.len());
            cells.insert(
                *only,
                Cell {
                    x,
                    y: center - size.height / 2,
                    size,
                },
            );
            continue;
        }

        let mut above = center - ROW_GAP / 2;
        let mut below = center + ROW_GAP / 2;
        for &i in &column.members {
            let size = card_size(steps[i].tasks.len());
            if steps[i].ordinal_lenient().is_odd_slot() {
                let y = above - size.height;
                cells.insert(i, Cell { x, y, size });
                above = y - ROW_GAP;
            } else {
                cells.insert(i, Cell { x, y: below, size });
                below += size.height + ROW_GAP;
            }
        }
    }

    // Shift down so nothing sits above the baseline.
    let top = cells.values().map(|c| c.y).min().unwrap_or(BASELINE_Y);
    if top < BASELINE_Y {
        let shift = BASELINE_Y - top;
        for cell in cells.values_mut() {
            cell.y += shift;
        }
    }
}

/// Place standalone steps beneath their anchors and return their dashed edges.
///
/// The anchor is the step named by the standalone step's `anchor` field when
/// it is a placed sequential step, otherwise the first step of the last column.
fn place_standalone(
    steps: &[Step],
    columns: &[Column],
    cells: &mut BTreeMap<usize, Cell>,
) -> Vec<Edge> {
    let default_anchor = columns.last().and_then(|c| c.members.first().copied());
    let mut next_y: BTreeMap<usize, i64> = BTreeMap::new();
    let mut loose_y = BASELINE_Y;
    let mut edges = Vec::new();

    for i in canonical_order(steps) {
        let step = &steps[i];
        if !step.is_standalone() {
            continue;
        }
        let size = card_size(step.tasks.len());
        let declared = step.anchor.as_deref().and_then(|id| {
            steps
                .iter()
                .position(|s| s.id == id && !s.is_standalone())
                .filter(|a| cells.contains_key(a))
        });

        match declared.or(default_anchor) {
            Some(anchor) => {
                let Some(anchor_cell) = cells.get(&anchor).copied() else {
                    continue;
                };
                let y = *next_y
                    .entry(anchor)
                    .or_insert(anchor_cell.bottom() + ROW_GAP);
                cells.insert(
                    i,
                    Cell {
                        x: anchor_cell.x,
                        y,
                        size,
                    },
                );
                next_y.insert(anchor, y + size.height + ROW_GAP);
                edges.push(Edge::new(&steps[anchor].id, &step.id, EdgeKind::FlowAligned).dashed());
            }
            None => {
                cells.insert(
                    i,
                    Cell {
                        x: BASELINE_X,
                        y: loose_y,
                        size,
                    },
                );
                loose_y += size.height + ROW_GAP;
            }
        }
    }
    edges
}
