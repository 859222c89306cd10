use std::path::Path;

use image::{imageops, imageops::FilterType, ImageBuffer, Luma};

use crate::{vol::Vol, Float, LineNetError, Result};

// Resampling stays in the integer domain, as the crops were recorded.
type Plane = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Decoded image with interleaved channels (row major, channels innermost).
/// Color images are stored B, G, R with values in 0..255, depth images as
/// raw 16 bit values.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Pixels {
    width: usize,
    height: usize,
    channels: usize,
    data: Vec<u16>,
}

impl Pixels {
    pub fn new(width: usize, height: usize, channels: usize, data: Vec<u16>) -> Result<Self> {
        if data.len() != width * height * channels {
            return Err(LineNetError::Config(format!(
                "{} pixel values for a {width}x{height}x{channels} image",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn data(&self) -> &[u16] {
        &self.data
    }

    /// Appends the channels of `other` to every pixel.
    pub fn stack(&self, other: &Pixels) -> Result<Pixels> {
        if (self.width, self.height) != (other.width, other.height) {
            return Err(LineNetError::Config(format!(
                "cannot stack a {}x{} image onto a {}x{} image",
                other.width, other.height, self.width, self.height
            )));
        }

        let channels = self.channels + other.channels;
        let mut data = Vec::with_capacity(self.width * self.height * channels);
        for (a, b) in self
            .data
            .chunks_exact(self.channels)
            .zip(other.data.chunks_exact(other.channels))
        {
            data.extend_from_slice(a);
            data.extend_from_slice(b);
        }
        Pixels::new(self.width, self.height, channels, data)
    }

    pub fn flip_horizontal(&self) -> Pixels {
        let mut planes = self.planes();
        for plane in &mut planes {
            imageops::flip_horizontal_in_place(plane);
        }
        Self::from_planes(&planes, self.width, self.height)
    }

    /// Bilinear resize to `width × height`.
    pub fn resize(&self, width: usize, height: usize) -> Pixels {
        if (width, height) == (self.width, self.height) {
            return self.clone();
        }
        let planes: Vec<Plane> = self
            .planes()
            .iter()
            .map(|p| imageops::resize(p, width as u32, height as u32, FilterType::Triangle))
            .collect();
        Self::from_planes(&planes, width, height)
    }

    /// Subtracts `mean` per channel and wraps the result as a
    /// `width × height × channels` volume.
    pub fn to_vol(&self, mean: &[Float]) -> Result<Vol> {
        if mean.len() != self.channels {
            return Err(LineNetError::Config(format!(
                "mean has {} entries for {} channel images",
                mean.len(),
                self.channels
            )));
        }
        let w = self
            .data
            .chunks_exact(self.channels)
            .flat_map(|px| px.iter().zip(mean).map(|(v, m)| *v as Float - m))
            .collect();
        Ok(Vol::from_hwc(self.width, self.height, self.channels, w))
    }

    fn planes(&self) -> Vec<Plane> {
        (0..self.channels)
            .map(|c| {
                Plane::from_fn(self.width as u32, self.height as u32, |x, y| {
                    let i = (y as usize * self.width + x as usize) * self.channels + c;
                    Luma([self.data[i]])
                })
            })
            .collect()
    }

    fn from_planes(planes: &[Plane], width: usize, height: usize) -> Pixels {
        let channels = planes.len();
        let mut data = Vec::with_capacity(width * height * channels);
        for y in 0..height as u32 {
            for x in 0..width as u32 {
                data.extend(planes.iter().map(|p| p.get_pixel(x, y)[0]));
            }
        }
        Pixels {
            width,
            height,
            channels,
            data,
        }
    }
}

fn open(path: &Path) -> Result<image::DynamicImage> {
    image::open(path).map_err(|source| LineNetError::Image {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads a color image in B, G, R channel order.
pub fn load_bgr(path: impl AsRef<Path>) -> Result<Pixels> {
    let path = path.as_ref();
    let img = open(path)?.to_rgb8();
    let (width, height) = (img.width() as usize, img.height() as usize);
    let data = img
        .pixels()
        .flat_map(|px| {
            let [r, g, b] = px.0;
            [b as u16, g as u16, r as u16]
        })
        .collect();
    Pixels::new(width, height, 3, data)
}

/// Loads a single channel depth image without rescaling its values.
pub fn load_depth(path: impl AsRef<Path>) -> Result<Pixels> {
    let path = path.as_ref();
    let img = open(path)?.to_luma16();
    let (width, height) = (img.width() as usize, img.height() as usize);
    let data = img.pixels().map(|px| px.0[0]).collect();
    Pixels::new(width, height, 1, data)
}

/// Flip, resize to `(width, height)` and mean subtraction, in that order.
pub fn preprocess(
    pixels: &Pixels,
    flip: bool,
    (width, height): (usize, usize),
    mean: &[Float],
) -> Result<Vol> {
    let flipped;
    let pixels = if flip {
        flipped = pixels.flip_horizontal();
        &flipped
    } else {
        pixels
    };
    pixels.resize(width, height).to_vol(mean)
}

#[cfg(test)]
mod tests {
    use image::{Luma, Rgb};

    use super::*;

    fn ramp() -> Pixels {
        // 3 wide, 2 high, 2 channels
        let data = (0..12).collect();
        Pixels::new(3, 2, 2, data).unwrap()
    }

    #[test]
    fn loads_color_as_bgr() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rgb.png");
        image::RgbImage::from_pixel(2, 1, Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();

        let pixels = load_bgr(&path).unwrap();
        assert_eq!((pixels.width(), pixels.height(), pixels.channels()), (2, 1, 3));
        assert_eq!(pixels.data(), &[30, 20, 10, 30, 20, 10]);
    }

    #[test]
    fn depth_keeps_raw_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depth.png");
        ImageBuffer::<Luma<u16>, Vec<u16>>::from_pixel(1, 1, Luma([4000]))
            .save(&path)
            .unwrap();

        let pixels = load_depth(&path).unwrap();
        assert_eq!(pixels.data(), &[4000]);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_bgr("/nonexistent/line.png").unwrap_err();
        assert!(matches!(err, LineNetError::Image { ref path, .. } if path.ends_with("line.png")));
    }

    #[test]
    fn flip_mirrors_columns() {
        let flipped = ramp().flip_horizontal();
        assert_eq!(
            flipped.data(),
            &[4, 5, 2, 3, 0, 1, 10, 11, 8, 9, 6, 7]
        );
    }

    #[test]
    fn stack_interleaves_channels() {
        let bgr = Pixels::new(2, 1, 3, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let depth = Pixels::new(2, 1, 1, vec![900, 800]).unwrap();
        let stacked = bgr.stack(&depth).unwrap();
        assert_eq!(stacked.channels(), 4);
        assert_eq!(stacked.data(), &[1, 2, 3, 900, 4, 5, 6, 800]);

        let other = Pixels::new(1, 1, 1, vec![0]).unwrap();
        assert!(bgr.stack(&other).is_err());
    }

    #[test]
    fn preprocess_resizes_and_subtracts_mean() {
        let constant = Pixels::new(4, 4, 2, vec![10; 32]).unwrap();
        let vol = preprocess(&constant, true, (2, 3), &[1.0, 4.0]).unwrap();
        assert_eq!((vol.sx(), vol.sy(), vol.depth()), (2, 3, 2));
        for px in vol.w.chunks_exact(2) {
            assert!((px[0] - 9.0).abs() < 1e-4);
            assert!((px[1] - 6.0).abs() < 1e-4);
        }

        assert!(preprocess(&constant, false, (2, 2), &[1.0]).is_err());
    }
}
