//! Camera defect descriptions extracted from a gain reference.

use std::fmt::Display;

/// A single defective pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointDefect {
    pub x: usize,
    pub y: usize,
}

/// A band of defective columns or rows, `begin..=end`, spanning the full sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineDefect {
    pub begin: usize,
    pub end: usize,
}

impl LineDefect {
    pub fn len(&self) -> usize {
        self.end - self.begin + 1
    }
}

/// An inclusive rectangle of defective pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaDefect {
    pub begin_x: usize,
    pub begin_y: usize,
    pub end_x: usize,
    pub end_y: usize,
}

impl AreaDefect {
    pub fn width(&self) -> usize {
        self.end_x - self.begin_x + 1
    }

    pub fn height(&self) -> usize {
        self.end_y - self.begin_y + 1
    }
}

/// All defects of a camera, in the order they were found.
///
/// List order matters: correction and neighbour-map construction process
/// vertical lines, horizontal lines, points and areas in that sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraDefects {
    pub points: Vec<PointDefect>,
    pub vertical_lines: Vec<LineDefect>,
    pub horizontal_lines: Vec<LineDefect>,
    pub areas: Vec<AreaDefect>,
    /// Total number of defective pixels on the sensor grid.
    pub defective_pixels: usize,
}

impl CameraDefects {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
            && self.vertical_lines.is_empty()
            && self.horizontal_lines.is_empty()
            && self.areas.is_empty()
    }
}

impl Display for CameraDefects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} defective pixels: {} points, {} vertical lines, {} horizontal lines, {} areas",
            self.defective_pixels,
            self.points.len(),
            self.vertical_lines.len(),
            self.horizontal_lines.len(),
            self.areas.len()
        )
    }
}
