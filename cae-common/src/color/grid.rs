//! Decoded pixel grids

use crate::{Error, Result};

/// Channel layout of a pixel grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    /// Blue-green-red, as produced by camera capture libraries
    Bgr,
}

/// Row-major grid of interleaved 8-bit pixels (height × width × channels)
#[derive(Debug, Clone)]
pub struct PixelGrid {
    width: u32,
    height: u32,
    channels: usize,
    order: ChannelOrder,
    data: Vec<u8>,
}

impl PixelGrid {
    /// Build a grid, rejecting empty images and anything with fewer than 3 channels
    pub fn new(
        width: u32,
        height: u32,
        channels: usize,
        order: ChannelOrder,
        data: Vec<u8>,
    ) -> Result<Self> {
        let pixel_count = width as usize * height as usize;
        if pixel_count == 0 {
            return Err(Error::Decode(format!(
                "image has no pixels ({}x{})",
                width, height
            )));
        }
        if channels < 3 {
            return Err(Error::Decode(format!(
                "image has {} channel(s), need at least 3",
                channels
            )));
        }
        let expected = pixel_count * channels;
        if data.len() != expected {
            return Err(Error::Decode(format!(
                "pixel buffer holds {} bytes, expected {}",
                data.len(),
                expected
            )));
        }

        Ok(Self {
            width,
            height,
            channels,
            order,
            data,
        })
    }

    /// Solid-color RGB grid
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self::new(width, height, 3, ChannelOrder::Rgb, data)
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

    /// Iterate pixels canonicalized to RGB; channels past the third are ignored.
    pub fn rgb_pixels(&self) -> impl Iterator<Item = [u8; 3]> + Clone + '_ {
        let order = self.order;
        self.data.chunks_exact(self.channels).map(move |px| match order {
            ChannelOrder::Rgb => [px[0], px[1], px[2]],
            ChannelOrder::Bgr => [px[2], px[1], px[0]],
        })
    }
}

/// Decode encoded image bytes (format detected from magic bytes) into an RGB grid
pub fn decode_image(bytes: &[u8]) -> Result<PixelGrid> {
    let image = image::load_from_memory(bytes).map_err(|e| Error::Decode(e.to_string()))?;
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    PixelGrid::new(width, height, 3, ChannelOrder::Rgb, rgb.into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    #[test]
    fn test_empty_grid_rejected() {
        let err = PixelGrid::new(0, 10, 3, ChannelOrder::Rgb, Vec::new()).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_two_channel_grid_rejected() {
        let err = PixelGrid::new(2, 2, 2, ChannelOrder::Rgb, vec![0; 8]).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_buffer_length_mismatch_rejected() {
        let err = PixelGrid::new(2, 2, 3, ChannelOrder::Rgb, vec![0; 11]).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_bgr_canonicalized_to_rgb() {
        let grid = PixelGrid::new(1, 1, 3, ChannelOrder::Bgr, vec![10, 20, 30]).unwrap();
        let pixels: Vec<_> = grid.rgb_pixels().collect();
        assert_eq!(pixels, vec![[30, 20, 10]]);
    }

    #[test]
    fn test_alpha_channel_ignored() {
        let grid = PixelGrid::new(1, 2, 4, ChannelOrder::Rgb, vec![1, 2, 3, 255, 4, 5, 6, 0])
            .unwrap();
        let pixels: Vec<_> = grid.rgb_pixels().collect();
        assert_eq!(pixels, vec![[1, 2, 3], [4, 5, 6]]);
    }

    #[test]
    fn test_decode_png() {
        let img = RgbImage::from_pixel(4, 3, Rgb([0, 128, 255]));
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, ImageFormat::Png).unwrap();

        let grid = decode_image(bytes.get_ref()).unwrap();
        assert_eq!(grid.width(), 4);
        assert_eq!(grid.height(), 3);
        assert!(grid.rgb_pixels().all(|px| px == [0, 128, 255]));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = decode_image(b"Fake image data").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
