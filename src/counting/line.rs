//! Counting line definitions and their pixel resolution.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Upper bound on lines per direction.
pub const MAX_LINES_PER_DIRECTION: usize = 16;

/// Travel direction a line counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Moving towards the top of the frame (decreasing y)
    Up,
    /// Moving towards the bottom of the frame (increasing y)
    Down,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Up, Direction::Down];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }

    /// Whether moving from `prev_y` to `curr_y` crosses `line_y` in this
    /// direction. Landing exactly on the line counts as crossed.
    #[inline]
    pub fn crossed(self, prev_y: f32, curr_y: f32, line_y: f32) -> bool {
        match self {
            Self::Up => prev_y > line_y && curr_y <= line_y,
            Self::Down => prev_y < line_y && curr_y >= line_y,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one counting line: direction plus zero-based index.
///
/// Displays as `up1`, `down3`, ... (one-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineId {
    pub direction: Direction,
    pub index: u8,
}

impl LineId {
    #[inline]
    pub fn new(direction: Direction, index: u8) -> Self {
        Self { direction, index }
    }

    #[inline]
    pub fn up(index: u8) -> Self {
        Self::new(Direction::Up, index)
    }

    #[inline]
    pub fn down(index: u8) -> Self {
        Self::new(Direction::Down, index)
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.direction, self.index as usize + 1)
    }
}

impl FromStr for LineId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (direction, rest) = if let Some(rest) = s.strip_prefix("up") {
            (Direction::Up, rest)
        } else if let Some(rest) = s.strip_prefix("down") {
            (Direction::Down, rest)
        } else {
            return Err(ConfigError::invalid(format!("unknown line name: {s}")));
        };
        match rest.parse::<u8>() {
            Ok(n) if n >= 1 => Ok(Self::new(direction, n - 1)),
            _ => Err(ConfigError::invalid(format!("unknown line name: {s}"))),
        }
    }
}

/// Fractional line positions as stored in configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LinesConfig {
    /// Positions of `up1..upN` as fractions of frame height
    pub up: Vec<f32>,
    /// Positions of `down1..downN` as fractions of frame height
    pub down: Vec<f32>,
}

impl LinesConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for direction in Direction::ALL {
            let positions = self.positions(direction);
            if positions.len() > MAX_LINES_PER_DIRECTION {
                return Err(ConfigError::invalid(format!(
                    "at most {MAX_LINES_PER_DIRECTION} {direction} lines are supported, got {}",
                    positions.len()
                )));
            }
            for (i, &fraction) in positions.iter().enumerate() {
                if !(0.0..=1.0).contains(&fraction) {
                    return Err(ConfigError::invalid(format!(
                        "line {direction}{} position {fraction} is outside [0, 1]",
                        i + 1
                    )));
                }
            }
        }
        if self.up.is_empty() && self.down.is_empty() {
            return Err(ConfigError::invalid("at least one counting line is required"));
        }
        Ok(())
    }

    fn positions(&self, direction: Direction) -> &[f32] {
        match direction {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        }
    }
}

/// Immutable, validated set of counting lines.
#[derive(Debug, Clone, PartialEq)]
pub struct LineSet {
    up: Vec<f32>,
    down: Vec<f32>,
}

impl LineSet {
    pub fn new(config: &LinesConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            up: config.up.clone(),
            down: config.down.clone(),
        })
    }

    #[inline]
    pub fn count(&self, direction: Direction) -> usize {
        self.fractions(direction).len()
    }

    pub fn fractions(&self, direction: Direction) -> &[f32] {
        match direction {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        }
    }

    /// All lines with their fractional positions, up lines first.
    pub fn iter(&self) -> impl Iterator<Item = (LineId, f32)> + '_ {
        Direction::ALL.into_iter().flat_map(move |direction| {
            self.fractions(direction)
                .iter()
                .enumerate()
                .map(move |(i, &f)| (LineId::new(direction, i as u8), f))
        })
    }

    /// Resolve every line to a pixel row for a frame of `frame_height`.
    pub fn resolve(&self, frame_height: u32) -> ResolvedLines {
        let lines = self
            .iter()
            .map(|(id, fraction)| ResolvedLine {
                id,
                y: (fraction * frame_height as f32).floor(),
            })
            .collect();
        ResolvedLines {
            frame_height,
            lines,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedLine {
    pub id: LineId,
    /// Pixel row of the line
    pub y: f32,
}

/// Lines resolved against one frame height.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLines {
    frame_height: u32,
    lines: Vec<ResolvedLine>,
}

impl ResolvedLines {
    #[inline]
    pub fn frame_height(&self) -> u32 {
        self.frame_height
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &ResolvedLine> {
        self.lines.iter()
    }

    pub fn get(&self, id: LineId) -> Option<&ResolvedLine> {
        self.lines.iter().find(|l| l.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_names() {
        assert_eq!(LineId::up(0).to_string(), "up1");
        assert_eq!(LineId::down(2).to_string(), "down3");
        assert_eq!("down2".parse::<LineId>().unwrap(), LineId::down(1));
        assert!("up0".parse::<LineId>().is_err());
        assert!("left1".parse::<LineId>().is_err());
    }

    #[test]
    fn test_crossing_predicates() {
        assert!(Direction::Up.crossed(100.0, 50.0, 75.0));
        assert!(Direction::Up.crossed(100.0, 75.0, 75.0));
        assert!(!Direction::Up.crossed(75.0, 50.0, 75.0));
        assert!(!Direction::Up.crossed(50.0, 100.0, 75.0));

        assert!(Direction::Down.crossed(50.0, 100.0, 75.0));
        assert!(Direction::Down.crossed(50.0, 75.0, 75.0));
        assert!(!Direction::Down.crossed(100.0, 50.0, 75.0));
    }

    #[test]
    fn test_resolve_against_frame_height() {
        let lines = LineSet::new(&LinesConfig {
            up: vec![0.5, 0.25],
            down: vec![0.75],
        })
        .unwrap();

        let resolved = lines.resolve(200);
        assert_eq!(resolved.get(LineId::up(0)).unwrap().y, 100.0);
        assert_eq!(resolved.get(LineId::up(1)).unwrap().y, 50.0);
        assert_eq!(resolved.get(LineId::down(0)).unwrap().y, 150.0);

        let resized = lines.resolve(720);
        assert_eq!(resized.get(LineId::up(0)).unwrap().y, 360.0);
        assert_eq!(resized.frame_height(), 720);
    }

    #[test]
    fn test_validation() {
        assert!(LineSet::new(&LinesConfig::default()).is_err());
        assert!(
            LineSet::new(&LinesConfig {
                up: vec![1.2],
                down: vec![],
            })
            .is_err()
        );
        assert!(
            LineSet::new(&LinesConfig {
                up: vec![],
                down: vec![0.0, 1.0],
            })
            .is_ok()
        );
    }
}
