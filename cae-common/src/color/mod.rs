//! Dominant color extraction
//!
//! The extractor clusters all pixels of an image in RGB space with a single
//! centroid, which is the per-channel mean, then names the rounded result.

mod grid;
mod kmeans;
mod names;

pub use grid::{decode_image, ChannelOrder, PixelGrid};
pub use kmeans::{kmeans, Clusters, TermCriteria};
pub use names::get_color_name;

use crate::Result;
use serde::{Deserialize, Serialize};

/// Name recorded when no exact table entry exists
pub const UNKNOWN_COLOR_NAME: &str = "Unknown";

/// Representative color of an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorAnalysis {
    pub rgb: [u8; 3],
    pub hex: String,
    pub name: String,
}

impl ColorAnalysis {
    pub fn from_rgb(rgb: [u8; 3]) -> Self {
        Self {
            rgb,
            hex: rgb_to_hex(rgb),
            name: get_color_name(rgb)
                .unwrap_or(UNKNOWN_COLOR_NAME)
                .to_string(),
        }
    }
}

/// `#rrggbb`, lowercase
pub fn rgb_to_hex(rgb: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

/// Extracts the representative color of a pixel grid
#[derive(Debug, Clone, Default)]
pub struct ColorExtractor {
    criteria: TermCriteria,
}

impl ColorExtractor {
    /// Cluster count; one cluster means the representative color is the mean
    pub const CLUSTERS: usize = 1;

    pub fn extract(&self, grid: &PixelGrid) -> Result<ColorAnalysis> {
        let clusters = kmeans(grid.rgb_pixels(), Self::CLUSTERS, self.criteria)?;
        let centroid = clusters.dominant();
        let rgb = [
            to_channel(centroid[0]),
            to_channel(centroid[1]),
            to_channel(centroid[2]),
        ];

        tracing::debug!(
            pixels = grid.pixel_count(),
            iterations = clusters.iterations,
            ?rgb,
            "Extracted dominant color"
        );

        Ok(ColorAnalysis::from_rgb(rgb))
    }

    /// Decode encoded image bytes and extract in one step
    pub fn extract_from_bytes(&self, bytes: &[u8]) -> Result<ColorAnalysis> {
        let grid = decode_image(bytes)?;
        self.extract(&grid)
    }
}

fn to_channel(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_rgb_to_hex() {
        assert_eq!(rgb_to_hex([255, 0, 0]), "#ff0000");
        assert_eq!(rgb_to_hex([0, 0, 0]), "#000000");
        assert_eq!(rgb_to_hex([10, 171, 254]), "#0aabfe");
    }

    #[test]
    fn test_solid_named_color() {
        let grid = PixelGrid::solid(100, 100, [255, 0, 0]).unwrap();
        let analysis = ColorExtractor::default().extract(&grid).unwrap();

        assert_eq!(analysis.rgb, [255, 0, 0]);
        assert_eq!(analysis.hex, "#ff0000");
        assert_eq!(analysis.name, "red");
    }

    #[test]
    fn test_solid_unnamed_color_is_unknown() {
        let grid = PixelGrid::solid(8, 8, [100, 100, 100]).unwrap();
        let analysis = ColorExtractor::default().extract(&grid).unwrap();

        assert_eq!(analysis.rgb, [100, 100, 100]);
        assert_eq!(analysis.hex, "#646464");
        assert_eq!(analysis.name, UNKNOWN_COLOR_NAME);
    }

    #[test]
    fn test_mean_is_rounded() {
        // Means: (0+255)/2 = 127.5 -> 128, (0+1)/2 = 0.5 -> 1, 10
        let data = vec![0, 0, 10, 255, 1, 10];
        let grid = PixelGrid::new(2, 1, 3, ChannelOrder::Rgb, data).unwrap();
        let analysis = ColorExtractor::default().extract(&grid).unwrap();

        assert_eq!(analysis.rgb, [128, 1, 10]);
    }

    #[test]
    fn test_bgr_input_matches_rgb() {
        let bgr = PixelGrid::new(1, 1, 3, ChannelOrder::Bgr, vec![0, 0, 255]).unwrap();
        let analysis = ColorExtractor::default().extract(&bgr).unwrap();
        assert_eq!(analysis.name, "red");
    }

    #[test]
    fn test_extract_from_garbage_bytes() {
        let err = ColorExtractor::default()
            .extract_from_bytes(b"\x00\x01\x02")
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
