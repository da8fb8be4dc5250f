//! Decoded electron coordinates.

use crate::process::{SENSOR_SIZE, SUB_PIXEL_BITS};

const SUB_PIXEL_MASK: u16 = (1 << SUB_PIXEL_BITS) - 1;

/// Electron position on the 4x super-resolved sensor grid.
///
/// The low [`SUB_PIXEL_BITS`] bits of each axis hold the sub-pixel phase, the
/// remaining bits the physical pixel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(C)]
pub struct ElectronPos {
    pub x: u16,
    pub y: u16,
}

impl ElectronPos {
    /// Marks an electron removed by defect masking. The slot stays in the list.
    pub const SENTINEL: ElectronPos = ElectronPos {
        x: 0xFFFF,
        y: 0xFFFF,
    };

    pub const fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }

    /// Builds a position from a physical pixel and a sub-pixel offset (0..4).
    pub const fn from_pixel(pixel_x: u16, pixel_y: u16, sub_x: u16, sub_y: u16) -> Self {
        Self {
            x: (pixel_x << SUB_PIXEL_BITS) | (sub_x & SUB_PIXEL_MASK),
            y: (pixel_y << SUB_PIXEL_BITS) | (sub_y & SUB_PIXEL_MASK),
        }
    }

    pub const fn is_sentinel(&self) -> bool {
        self.x == 0xFFFF && self.y == 0xFFFF
    }

    pub const fn pixel_x(&self) -> u16 {
        self.x >> SUB_PIXEL_BITS
    }

    pub const fn pixel_y(&self) -> u16 {
        self.y >> SUB_PIXEL_BITS
    }

    pub const fn sub_x(&self) -> u16 {
        self.x & SUB_PIXEL_MASK
    }

    pub const fn sub_y(&self) -> u16 {
        self.y & SUB_PIXEL_MASK
    }

    /// Raster index of the physical pixel on the sensor grid.
    pub const fn pixel_index(&self) -> usize {
        self.pixel_y() as usize * SENSOR_SIZE + self.pixel_x() as usize
    }

    /// Replaces the sub-pixel phase, keeping the physical pixel.
    pub fn set_sub_pixel(&mut self, sub_x: u16, sub_y: u16) {
        self.x = (self.x & !SUB_PIXEL_MASK) | (sub_x & SUB_PIXEL_MASK);
        self.y = (self.y & !SUB_PIXEL_MASK) | (sub_y & SUB_PIXEL_MASK);
    }

    pub fn to_le_bytes(self) -> [u8; 4] {
        let [x0, x1] = self.x.to_le_bytes();
        let [y0, y1] = self.y.to_le_bytes();
        [x0, x1, y0, y1]
    }
}

/// Serializes an electron list as consecutive little-endian `(x, y)` pairs.
pub fn write_electron_list<W: std::io::Write>(
    writer: &mut W,
    electrons: &[ElectronPos],
) -> std::io::Result<()> {
    for electron in electrons {
        writer.write_all(&electron.to_le_bytes())?;
    }
    Ok(())
}

#[test]
fn pixel_and_phase_split() {
    let mut pos = ElectronPos::from_pixel(4095, 17, 3, 1);
    assert_eq!(pos.x, 16383);
    assert_eq!(pos.y, 69);
    assert_eq!(pos.pixel_index(), 17 * 4096 + 4095);

    pos.set_sub_pixel(0, 2);
    assert_eq!((pos.pixel_x(), pos.pixel_y()), (4095, 17));
    assert_eq!((pos.sub_x(), pos.sub_y()), (0, 2));
    assert!(ElectronPos::SENTINEL.is_sentinel());
    assert!(!pos.is_sentinel());
}

#[test]
fn electron_list_bytes() -> std::io::Result<()> {
    let mut out = Vec::new();
    write_electron_list(
        &mut out,
        &[ElectronPos::new(0x0102, 0x0304), ElectronPos::SENTINEL],
    )?;
    assert_eq!(out, [0x02, 0x01, 0x04, 0x03, 0xFF, 0xFF, 0xFF, 0xFF]);
    Ok(())
}
