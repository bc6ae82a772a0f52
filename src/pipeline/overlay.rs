//! Ring indicator drawn around the detected marker

use serde::{Deserialize, Serialize};

use super::frame::{Frame, Pixel};

/// Ring geometry and color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingStyle {
    pub radius: u32,
    pub thickness: u32,
    /// RGB; the ring is always drawn opaque
    pub color: [u8; 3],
}

impl Default for RingStyle {
    fn default() -> Self {
        Self {
            radius: 50,
            thickness: 5,
            color: [0, 0, 255],
        }
    }
}

impl RingStyle {
    pub fn pixel(&self) -> Pixel {
        let [r, g, b] = self.color;
        Pixel::opaque(r, g, b)
    }
}

/// Paint every pixel whose distance from `(cx, cy)` lies strictly inside
/// `(radius - thickness, radius)`. Only the ring's bounding box is visited.
/// Returns the number of pixels painted.
pub fn draw_ring(frame: &mut Frame, cx: u32, cy: u32, style: &RingStyle) -> usize {
    let color = style.pixel();
    let outer = style.radius as i64;
    let inner = outer - style.thickness as i64;

    let outer_sq = outer * outer;
    // a negative inner bound admits the center itself
    let inner_sq = if inner < 0 { -1 } else { inner * inner };

    let (cx, cy) = (cx as i64, cy as i64);
    let x0 = (cx - outer).max(0);
    let y0 = (cy - outer).max(0);
    let x1 = (cx + outer).min(frame.width() as i64 - 1);
    let y1 = (cy + outer).min(frame.height() as i64 - 1);

    let mut painted = 0;
    for y in y0..=y1 {
        let dy = y - cy;
        for x in x0..=x1 {
            let dx = x - cx;
            let d_sq = dx * dx + dy * dy;
            if d_sq > inner_sq && d_sq < outer_sq {
                frame.set_pixel(x as u32, y as u32, color);
                painted += 1;
            }
        }
    }
    painted
}
