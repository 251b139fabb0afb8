//! Per-line crossing detection and counter storage.

use std::collections::HashSet;

use tracing::debug;

use crate::counting::line::{Direction, LineId, LineSet, ResolvedLines};
use crate::tracker::ClassLabel;

type ClassCounts = [u64; ClassLabel::COUNT];

/// Counts keyed by (class, line), stored per direction and line index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterTable {
    lines: [Vec<ClassCounts>; 2],
}

impl CounterTable {
    pub fn new(lines: &LineSet) -> Self {
        Self::with_lines(lines.count(Direction::Up), lines.count(Direction::Down))
    }

    pub fn with_lines(up: usize, down: usize) -> Self {
        Self {
            lines: [
                vec![[0; ClassLabel::COUNT]; up],
                vec![[0; ClassLabel::COUNT]; down],
            ],
        }
    }

    #[inline]
    pub fn line_count(&self, direction: Direction) -> usize {
        self.lines[direction.index()].len()
    }

    /// Count for `class` on `line`; zero for lines outside the table.
    pub fn get(&self, class: ClassLabel, line: LineId) -> u64 {
        self.lines[line.direction.index()]
            .get(line.index as usize)
            .map_or(0, |counts| counts[class.index()])
    }

    /// Increment the count for `class` on `line`. Returns the new value,
    /// or `None` when the line is outside the table.
    pub fn increment(&mut self, class: ClassLabel, line: LineId) -> Option<u64> {
        let counts = self.lines[line.direction.index()].get_mut(line.index as usize)?;
        let slot = &mut counts[class.index()];
        *slot = slot.saturating_add(1);
        Some(*slot)
    }

    /// Counts for `class` on each line of `direction`, in line order.
    pub fn per_line(
        &self,
        class: ClassLabel,
        direction: Direction,
    ) -> impl Iterator<Item = u64> + '_ {
        self.lines[direction.index()]
            .iter()
            .map(move |counts| counts[class.index()])
    }

    /// Every (class, line, count) triple, zero counts included.
    pub fn iter(&self) -> impl Iterator<Item = (ClassLabel, LineId, u64)> + '_ {
        Direction::ALL.into_iter().flat_map(move |direction| {
            self.lines[direction.index()]
                .iter()
                .enumerate()
                .flat_map(move |(i, counts)| {
                    let line = LineId::new(direction, i as u8);
                    ClassLabel::ALL
                        .into_iter()
                        .map(move |class| (class, line, counts[class.index()]))
                })
        })
    }

    pub fn total(&self) -> u64 {
        self.iter().map(|(_, _, n)| n).sum()
    }

    pub fn is_zero(&self) -> bool {
        self.iter().all(|(_, _, n)| n == 0)
    }

    pub fn reset(&mut self) {
        for direction in &mut self.lines {
            for counts in direction.iter_mut() {
                *counts = [0; ClassLabel::COUNT];
            }
        }
    }
}

/// Identities that already fired on each line.
#[derive(Debug, Clone, Default)]
pub struct CrossedSets {
    lines: [Vec<HashSet<u64>>; 2],
}

impl CrossedSets {
    pub fn new(lines: &LineSet) -> Self {
        Self {
            lines: [
                vec![HashSet::new(); lines.count(Direction::Up)],
                vec![HashSet::new(); lines.count(Direction::Down)],
            ],
        }
    }

    pub fn contains(&self, line: LineId, id: u64) -> bool {
        self.lines[line.direction.index()]
            .get(line.index as usize)
            .is_some_and(|set| set.contains(&id))
    }

    /// Mark `id` as crossed on `line`; `false` if it was already there.
    fn insert(&mut self, line: LineId, id: u64) -> bool {
        self.lines[line.direction.index()]
            .get_mut(line.index as usize)
            .is_some_and(|set| set.insert(id))
    }

    fn retain(&mut self, active: &HashSet<u64>) {
        for direction in &mut self.lines {
            for set in direction.iter_mut() {
                set.retain(|id| active.contains(id));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lines.iter().flatten().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single counted crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossingEvent {
    pub id: u64,
    pub line: LineId,
    pub class: ClassLabel,
}

/// Edge-triggered line crossing detector with at-most-once counting per
/// identity and line.
#[derive(Debug, Clone)]
pub struct LineCrossingCounter {
    crossed: CrossedSets,
    counts: CounterTable,
}

impl LineCrossingCounter {
    pub fn new(lines: &LineSet) -> Self {
        Self {
            crossed: CrossedSets::new(lines),
            counts: CounterTable::new(lines),
        }
    }

    /// Check one identity's movement against every line, counting and
    /// returning the crossings that fire.
    ///
    /// `prev_y` is `None` on an identity's first sighting, which never
    /// fires.
    pub fn check_crossings(
        &mut self,
        id: u64,
        prev_y: Option<f32>,
        curr_y: f32,
        class: ClassLabel,
        lines: &ResolvedLines,
    ) -> Vec<CrossingEvent> {
        let Some(prev_y) = prev_y else {
            return Vec::new();
        };

        let mut events = Vec::new();
        for line in lines.iter() {
            if !line.id.direction.crossed(prev_y, curr_y, line.y) {
                continue;
            }
            if !self.crossed.insert(line.id, id) {
                continue;
            }
            let count = self.counts.increment(class, line.id).unwrap_or_default();
            debug!(id, line = %line.id, class = %class, count, "line crossed");
            events.push(CrossingEvent {
                id,
                line: line.id,
                class,
            });
        }
        events
    }

    /// Forget crossed-state for identities no longer tracked.
    pub fn forget_stale(&mut self, active: &HashSet<u64>) {
        self.crossed.retain(active);
    }

    pub fn has_crossed(&self, id: u64, line: LineId) -> bool {
        self.crossed.contains(line, id)
    }

    pub fn crossed(&self) -> &CrossedSets {
        &self.crossed
    }

    pub fn counts(&self) -> &CounterTable {
        &self.counts
    }

    pub fn counts_mut(&mut self) -> &mut CounterTable {
        &mut self.counts
    }
}
