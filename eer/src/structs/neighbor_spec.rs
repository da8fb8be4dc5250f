//! Packed per-pixel defect neighbour annotations.
//!
//! Layout of one byte:
//!
//! | bits | meaning                                                   |
//! |------|-----------------------------------------------------------|
//! | 7..6 | class: `01` line edge, `10` point/area edge, `11` corner  |
//! | 5    | direction runs along the y axis                           |
//! | 4    | direction points backwards (left / up)                    |
//! | 3..0 | defect span length minus one, saturated                   |
//!
//! The value `1` (no class bits) marks a defective pixel itself.

const CLASS_MASK: u8 = 0xC0;
const CLASS_LINE_EDGE: u8 = 0x40;
const CLASS_POINT_EDGE: u8 = 0x80;
const CLASS_CORNER: u8 = 0xC0;

const AXIS_Y: u8 = 0x20;
const BACKWARD: u8 = 0x10;

const DISTANCE_MASK: u8 = 0x0F;

const DEFECT: u8 = 1;

/// How electron density next to a defect is spread into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborClass {
    /// Border of a line defect, spread along one axis.
    LineEdge,
    /// Border of a point or area defect, spread along one axis at half weight.
    PointEdge,
    /// Border shared by perpendicular line defects, spread along both axes.
    Corner,
}

/// Direction from the annotated pixel towards the defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Right,
    Left,
    Down,
    Up,
}

impl Direction {
    const fn bits(self) -> u8 {
        match self {
            Direction::Right => 0,
            Direction::Left => BACKWARD,
            Direction::Down => AXIS_Y,
            Direction::Up => AXIS_Y | BACKWARD,
        }
    }

    /// Raster offset of one step in this direction on a grid of `width` columns.
    pub const fn offset(self, width: usize) -> isize {
        match self {
            Direction::Right => 1,
            Direction::Left => -1,
            Direction::Down => width as isize,
            Direction::Up => -(width as isize),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct DefectNeighborSpec(pub u8);

impl DefectNeighborSpec {
    pub const NONE: Self = Self(0);
    pub const DEFECT: Self = Self(DEFECT);

    pub fn new(class: NeighborClass, direction: Direction, span: usize) -> Self {
        let class_bits = match class {
            NeighborClass::LineEdge => CLASS_LINE_EDGE,
            NeighborClass::PointEdge => CLASS_POINT_EDGE,
            NeighborClass::Corner => CLASS_CORNER,
        };
        let distance = span.min(DISTANCE_MASK as usize) as u8;
        Self(class_bits | direction.bits() | distance)
    }

    pub const fn is_defect(self) -> bool {
        self.0 == DEFECT
    }

    /// Whether the pixel borders a defect.
    pub const fn is_neighbor(self) -> bool {
        self.0 & CLASS_MASK != 0
    }

    pub const fn class(self) -> Option<NeighborClass> {
        match self.0 & CLASS_MASK {
            CLASS_LINE_EDGE => Some(NeighborClass::LineEdge),
            CLASS_POINT_EDGE => Some(NeighborClass::PointEdge),
            CLASS_CORNER => Some(NeighborClass::Corner),
            _ => None,
        }
    }

    pub const fn direction(self) -> Direction {
        match (self.0 & AXIS_Y != 0, self.0 & BACKWARD != 0) {
            (false, false) => Direction::Right,
            (false, true) => Direction::Left,
            (true, false) => Direction::Down,
            (true, true) => Direction::Up,
        }
    }

    /// Defect span length minus one.
    pub const fn distance(self) -> u8 {
        self.0 & DISTANCE_MASK
    }
}

#[test]
fn pack_and_unpack() {
    let spec = DefectNeighborSpec::new(NeighborClass::LineEdge, Direction::Left, 3);
    assert_eq!(spec.0, 0x53);
    assert_eq!(spec.class(), Some(NeighborClass::LineEdge));
    assert_eq!(spec.direction(), Direction::Left);
    assert_eq!(spec.distance(), 3);
    assert!(spec.is_neighbor());
    assert!(!spec.is_defect());

    let corner = DefectNeighborSpec::new(NeighborClass::Corner, Direction::Up, 40);
    assert_eq!(corner.0, 0xC0 | 0x30 | 0x0F);
    assert_eq!(corner.direction().offset(4096), -4096);

    assert!(DefectNeighborSpec::DEFECT.is_defect());
    assert!(!DefectNeighborSpec::DEFECT.is_neighbor());
    assert_eq!(DefectNeighborSpec::DEFECT.class(), None);
}
