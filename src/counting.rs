mod counter;
mod line;

pub use counter::{CounterTable, CrossedSets, CrossingEvent, LineCrossingCounter};
pub use line::{
    Direction, LineId, LineSet, LinesConfig, MAX_LINES_PER_DIRECTION, ResolvedLine, ResolvedLines,
};
