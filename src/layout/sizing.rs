//! Card dimensions and spacing, in grid units.

/// Horizontal gap between adjacent columns.
pub const COLUMN_GAP: i64 = 4;
/// Vertical gap between stacked cards.
pub const ROW_GAP: i64 = 2;
/// Top-left offset of the first column.
pub const BASELINE_X: i64 = 2;
pub const BASELINE_Y: i64 = 2;

const HEADER_HEIGHT: i64 = 3;
const HEIGHT_GRANULARITY: i64 = 2;
const MIN_HEIGHT: i64 = 4;
const MAX_HEIGHT: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardSize {
    pub width: i64,
    pub height: i64,
}

/// Size of a step card holding `task_count` tasks.
///
/// Monotonic in `task_count`. Height grows by three quarters of a unit per
/// task on top of the header, rounded up to the granularity and clamped;
/// width steps up only for long checklists. Heights are always even, so a
/// card's vertical midpoint is a whole grid unit.
pub fn card_size(task_count: usize) -> CardSize {
    let width = match task_count {
        0..=6 => 8,
        7..=12 => 9,
        _ => 10,
    };
    let tasks = i64::try_from(task_count).unwrap_or(i64::MAX / 4);
    let raw = HEADER_HEIGHT + (tasks.saturating_mul(3) + 3) / 4;
    let rounded = (raw + HEIGHT_GRANULARITY - 1) / HEIGHT_GRANULARITY * HEIGHT_GRANULARITY;
    CardSize {
        width,
        height: rounded.clamp(MIN_HEIGHT, MAX_HEIGHT),
    }
}
