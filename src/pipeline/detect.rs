//! Laser dot detection: strongest saturated red pixel in a converted frame

use serde::{Deserialize, Serialize};

use super::frame::{Frame, Pixel};

/// Channel limits a pixel has to meet to count as marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerThresholds {
    pub min_red: u8,
    pub min_alpha: u8,
    pub max_green: u8,
    pub max_blue: u8,
}

impl Default for MarkerThresholds {
    fn default() -> Self {
        Self {
            min_red: 210,
            min_alpha: 200,
            max_green: 60,
            max_blue: 60,
        }
    }
}

impl MarkerThresholds {
    #[inline]
    pub fn qualifies(&self, p: Pixel) -> bool {
        p.r >= self.min_red && p.a >= self.min_alpha && p.g <= self.max_green && p.b <= self.max_blue
    }
}

/// A located marker and its channel values at detection time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
    pub x: u32,
    pub y: u32,
    pub pixel: Pixel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    NotFound,
    Found(Marker),
}

impl Detection {
    pub fn marker(&self) -> Option<&Marker> {
        match self {
            Detection::Found(marker) => Some(marker),
            Detection::NotFound => None,
        }
    }

    pub fn position(&self) -> Option<(u32, u32)> {
        self.marker().map(|m| (m.x, m.y))
    }
}

/// Full raster scan for the qualifying pixel with the greatest `(red, alpha)`.
///
/// Ties go to the pixel scanned last.
pub fn find_marker(frame: &Frame, thresholds: &MarkerThresholds) -> Detection {
    let mut best: Option<Marker> = None;

    for (x, y, pixel) in frame.pixels() {
        if !thresholds.qualifies(pixel) {
            continue;
        }
        let better = match &best {
            None => true,
            Some(current) => (pixel.r, pixel.a) >= (current.pixel.r, current.pixel.a),
        };
        if better {
            best = Some(Marker { x, y, pixel });
        }
    }

    best.map_or(Detection::NotFound, Detection::Found)
}
