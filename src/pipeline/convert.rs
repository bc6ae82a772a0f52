//! Packed YUYV to RGBA conversion (fixed-point BT.601)

use super::frame::{Pixel, BYTES_PER_PIXEL};

/// Bytes in one macropixel: Y0 U Y1 V, two output pixels.
pub const MACROPIXEL_BYTES: usize = 4;

#[inline]
fn clamp_channel(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Convert one luma sample with its shared chroma pair.
#[inline]
pub fn yuv_to_pixel(y: u8, u: u8, v: u8) -> Pixel {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    Pixel {
        r: clamp_channel((298 * c + 409 * e + 128) >> 8),
        g: clamp_channel((298 * c - 100 * d - 208 * e + 128) >> 8),
        b: clamp_channel((298 * c + 516 * d + 128) >> 8),
        a: 255,
    }
}

/// Expand a `[Y0, U, Y1, V]` macropixel into two horizontally adjacent pixels.
#[inline]
pub fn convert_macropixel(macropixel: [u8; 4]) -> [Pixel; 2] {
    let [y0, u, y1, v] = macropixel;
    [yuv_to_pixel(y0, u, v), yuv_to_pixel(y1, u, v)]
}

/// Convert whole macropixels from `src` into BGRA bytes in `dst`.
///
/// Stops at whichever slice runs out first; trailing bytes that do not form a
/// complete macropixel are ignored. Returns the number of pixels written.
pub fn convert_into(src: &[u8], dst: &mut [u8]) -> usize {
    let mut written = 0;
    for (mp, out) in src
        .chunks_exact(MACROPIXEL_BYTES)
        .zip(dst.chunks_exact_mut(2 * BYTES_PER_PIXEL))
    {
        let [first, second] = convert_macropixel([mp[0], mp[1], mp[2], mp[3]]);
        let (lo, hi) = out.split_at_mut(BYTES_PER_PIXEL);
        first.write_to(lo);
        second.write_to(hi);
        written += 2;
    }
    written
}
