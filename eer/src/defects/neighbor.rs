use log::{debug, warn};

use crate::process::SENSOR_SIZE;
use crate::structs::defects::CameraDefects;
use crate::structs::neighbor_spec::{DefectNeighborSpec, Direction, NeighborClass};

/// Per-pixel defect annotations for the full sensor.
///
/// Built once from [`CameraDefects`] and shared read-only by all electron
/// adders. The gain image is kept outside the map and passed to each call.
pub struct DefectNeighborMap {
    specs: Box<[DefectNeighborSpec]>,
}

impl std::fmt::Debug for DefectNeighborMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let defects = self.specs.iter().filter(|s| s.is_defect()).count();
        let neighbors = self.specs.iter().filter(|s| s.is_neighbor()).count();
        f.debug_struct("DefectNeighborMap")
            .field("defects", &defects)
            .field("neighbors", &neighbors)
            .finish()
    }
}

impl Default for DefectNeighborMap {
    fn default() -> Self {
        Self {
            specs: vec![DefectNeighborSpec::NONE; SENSOR_SIZE * SENSOR_SIZE].into_boxed_slice(),
        }
    }
}

const LAST: usize = SENSOR_SIZE - 1;

impl DefectNeighborMap {
    /// Annotates vertical lines, horizontal lines, points and areas, in that
    /// order; later annotations overwrite earlier ones.
    pub fn build(defects: &CameraDefects) -> Self {
        let mut map = Self::default();

        for line in &defects.vertical_lines {
            if line.begin > line.end || line.end > LAST {
                warn!("Skipping vertical line defect {line:?} outside the sensor");
                continue;
            }
            let span = line.end - line.begin;
            for y in 0..SENSOR_SIZE {
                for x in line.begin..=line.end {
                    map.set(x, y, DefectNeighborSpec::DEFECT);
                }
                if line.begin > 0 {
                    let spec =
                        DefectNeighborSpec::new(NeighborClass::LineEdge, Direction::Right, span);
                    map.set(line.begin - 1, y, spec);
                }
                if line.end < LAST {
                    let spec =
                        DefectNeighborSpec::new(NeighborClass::LineEdge, Direction::Left, span);
                    map.set(line.end + 1, y, spec);
                }
            }
        }

        for line in &defects.horizontal_lines {
            if line.begin > line.end || line.end > LAST {
                warn!("Skipping horizontal line defect {line:?} outside the sensor");
                continue;
            }
            let span = line.end - line.begin;
            for x in 0..SENSOR_SIZE {
                for y in line.begin..=line.end {
                    map.set(x, y, DefectNeighborSpec::DEFECT);
                }
                if line.begin > 0 {
                    let y = line.begin - 1;
                    let class = if map.get(x, y).is_neighbor() && line.begin > 1 {
                        NeighborClass::Corner
                    } else {
                        NeighborClass::LineEdge
                    };
                    map.set(x, y, DefectNeighborSpec::new(class, Direction::Down, span));
                }
                if line.end < LAST {
                    let y = line.end + 1;
                    let class = if map.get(x, y).is_neighbor() && line.end < LAST - 1 {
                        NeighborClass::Corner
                    } else {
                        NeighborClass::LineEdge
                    };
                    map.set(x, y, DefectNeighborSpec::new(class, Direction::Up, span));
                }
            }
        }

        for point in &defects.points {
            let (x, y) = (point.x, point.y);
            if x > LAST || y > LAST {
                warn!("Skipping point defect {point:?} outside the sensor");
                continue;
            }
            map.set(x, y, DefectNeighborSpec::DEFECT);
            let edge = |direction| DefectNeighborSpec::new(NeighborClass::PointEdge, direction, 0);
            if y > 0 {
                map.set(x, y - 1, edge(Direction::Down));
            }
            if x > 0 {
                map.set(x - 1, y, edge(Direction::Right));
            }
            if x < LAST {
                map.set(x + 1, y, edge(Direction::Left));
            }
            if y < LAST {
                map.set(x, y + 1, edge(Direction::Up));
            }
        }

        for area in &defects.areas {
            if area.begin_x > area.end_x
                || area.begin_y > area.end_y
                || area.end_x > LAST
                || area.end_y > LAST
            {
                warn!("Skipping area defect {area:?} outside the sensor");
                continue;
            }
            let span_x = area.end_x - area.begin_x;
            let span_y = area.end_y - area.begin_y;
            for y in area.begin_y..=area.end_y {
                for x in area.begin_x..=area.end_x {
                    map.set(x, y, DefectNeighborSpec::DEFECT);
                }
            }

            let edge = |direction, span| {
                DefectNeighborSpec::new(NeighborClass::PointEdge, direction, span)
            };
            // bottom and right borders stay one pixel clear of the sensor edge
            if area.begin_y > 0 {
                for x in area.begin_x..=area.end_x {
                    map.set(x, area.begin_y - 1, edge(Direction::Down, span_y));
                }
            }
            if area.end_y < LAST - 1 {
                for x in area.begin_x..=area.end_x {
                    map.set(x, area.end_y + 1, edge(Direction::Up, span_y));
                }
            }
            if area.begin_x > 0 {
                for y in area.begin_y..=area.end_y {
                    map.set(area.begin_x - 1, y, edge(Direction::Right, span_x));
                }
            }
            if area.end_x < LAST - 1 {
                for y in area.begin_y..=area.end_y {
                    map.set(area.end_x + 1, y, edge(Direction::Left, span_x));
                }
            }
        }

        debug!("Built defect neighbor map: {map:?}");
        map
    }

    #[inline(always)]
    fn set(&mut self, x: usize, y: usize, spec: DefectNeighborSpec) {
        self.specs[y * SENSOR_SIZE + x] = spec;
    }

    #[inline(always)]
    pub fn get(&self, x: usize, y: usize) -> DefectNeighborSpec {
        self.specs[y * SENSOR_SIZE + x]
    }

    /// Annotation at raster index `index`, or [`DefectNeighborSpec::NONE`]
    /// outside the sensor.
    #[inline(always)]
    pub fn at(&self, index: usize) -> DefectNeighborSpec {
        self.specs
            .get(index)
            .copied()
            .unwrap_or(DefectNeighborSpec::NONE)
    }

    pub fn as_slice(&self) -> &[DefectNeighborSpec] {
        &self.specs
    }
}
