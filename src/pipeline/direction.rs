//! Mapping a marker position to a navigation direction

use std::fmt;

use super::detect::Detection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    Back,
    Left,
    Right,
    Forward,
    #[default]
    NotDetected,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Back => "back",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Forward => "forward",
            Direction::NotDetected => "not detected",
        };
        f.write_str(name)
    }
}

/// Zone lookup for a frame of `width` x `height`.
///
/// Checked in order Back, Left, Right; whatever remains inside the frame is
/// Forward. Positions outside the frame are `NotDetected`.
pub fn classify(detection: &Detection, width: u32, height: u32) -> Direction {
    let Some((x, y)) = detection.position() else {
        return Direction::NotDetected;
    };
    if x >= width || y >= height {
        return Direction::NotDetected;
    }

    let back_row = height * 3 / 4;
    let left_col = width / 4;
    let right_col = width * 3 / 4;

    if y >= back_row {
        Direction::Back
    } else if x <= left_col {
        Direction::Left
    } else if x >= right_col {
        Direction::Right
    } else {
        Direction::Forward
    }
}

/// Remembers the last reported direction so only changes are announced
#[derive(Debug, Clone, Default)]
pub struct DirectionTracker {
    last: Direction,
    changes: u64,
}

impl DirectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Direction {
        self.last
    }

    pub fn changes(&self) -> u64 {
        self.changes
    }

    /// Record this frame's direction. Returns true when it differs from the
    /// previously reported one.
    pub fn update(&mut self, direction: Direction) -> bool {
        if direction == self.last {
            return false;
        }
        self.last = direction;
        self.changes += 1;
        true
    }
}
