use image::Rgba32FImage;

pub type Rgba = [f32; 4];
pub type Rgb = [f32; 3];
pub type Rg = [f32; 2];

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("{len} pixels don't fit a {width}x{height} image")]
    Shape { width: u32, height: u32, len: usize },
    #[error("{width}x{height} image has no pixels")]
    Empty { width: u32, height: u32 },
}

/// Flat row-major image, pixel (x, y) lives at `y * width + x`.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer<P> {
    width: u32,
    height: u32,
    pixels: Vec<P>,
}

impl<P: Copy> PixelBuffer<P> {
    pub fn new(width: u32, height: u32, pixels: Vec<P>) -> Result<Self, BufferError> {
        if pixels.len() != width as usize * height as usize {
            return Err(BufferError::Shape {
                width,
                height,
                len: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> Option<P> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    pub fn pixels(&self) -> &[P] {
        &self.pixels
    }
}

#[cfg(test)]
impl<P: Copy> PixelBuffer<P> {
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> P) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }
}

impl PixelBuffer<Rgba> {
    // rows outer, columns inner; the decoder addresses pixels as (column, row)
    pub fn from_rgba_image(image: &Rgba32FImage) -> Result<Self, BufferError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(BufferError::Empty { width, height });
        }
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for i in 0..height {
            for j in 0..width {
                pixels.push(image.get_pixel(j, i).0);
            }
        }
        log::debug!("finished converting {}x{} image to a flat buffer", width, height);
        Ok(Self {
            width,
            height,
            pixels,
        })
    }
}
