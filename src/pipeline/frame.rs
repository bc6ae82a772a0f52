//! RGBA frame storage shared by conversion, detection and overlay

/// Bytes per output pixel.
pub const BYTES_PER_PIXEL: usize = 4;

/// Alpha value of a pixel no conversion has written yet.
pub const ALPHA_UNSET: u8 = 0;

/// A single output pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pixel {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Pixel {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Fully opaque pixel
    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// In-memory byte order of a frame: B, G, R, A.
    ///
    /// On little-endian hosts this is exactly an `ARGB8888` texel, so a frame
    /// can be uploaded to a streaming texture without reordering.
    #[inline]
    pub fn write_to(self, out: &mut [u8]) {
        out[0] = self.b;
        out[1] = self.g;
        out[2] = self.r;
        out[3] = self.a;
    }

    #[inline]
    pub fn read_from(bytes: &[u8]) -> Self {
        Self {
            b: bytes[0],
            g: bytes[1],
            r: bytes[2],
            a: bytes[3],
        }
    }
}

/// Fixed-size W x H grid of pixels, row-major, stored as BGRA bytes
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// New frame with every pixel zeroed (alpha unset)
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * BYTES_PER_PIXEL;
        Self {
            width,
            height,
            data: vec![0; len],
        }
    }

    /// New frame with every pixel set to `fill`
    pub fn filled(width: u32, height: u32, fill: Pixel) -> Self {
        let mut frame = Self::new(width, height);
        frame.fill(fill);
        frame
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Row stride in bytes
    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL
    }

    /// Pixel at (x, y). Panics when out of bounds.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> Pixel {
        let at = self.offset(x, y);
        Pixel::read_from(&self.data[at..at + BYTES_PER_PIXEL])
    }

    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, pixel: Pixel) {
        let at = self.offset(x, y);
        pixel.write_to(&mut self.data[at..at + BYTES_PER_PIXEL]);
    }

    pub fn fill(&mut self, pixel: Pixel) {
        for chunk in self.data.chunks_exact_mut(BYTES_PER_PIXEL) {
            pixel.write_to(chunk);
        }
    }

    /// Pixels in raster order with their coordinates
    pub fn pixels(&self) -> impl Iterator<Item = (u32, u32, Pixel)> + '_ {
        let width = self.width as usize;
        self.data
            .chunks_exact(BYTES_PER_PIXEL)
            .enumerate()
            .map(move |(i, px)| ((i % width) as u32, (i / width) as u32, Pixel::read_from(px)))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}
