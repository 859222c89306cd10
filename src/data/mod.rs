//! Readers and batch generators for line datasets.

pub mod archive;
pub mod frames;
pub mod generator;
pub mod image;
pub mod labels;

use std::{fmt, str::FromStr};

use crate::{LineNetError, Float, Result};

/// Per channel mean (B, G, R) of the line crops the network was trained on.
pub const BGR_MEAN: [Float; 3] = [22.474_292, 20.139_146, 5.625_114];

/// Length of the geometric descriptor of a line.
pub const LINE_NUM_ATTR: usize = 15;

/// Line category, one of 0, 1, 2, 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct LineType(u8);

impl LineType {
    pub fn new(value: u8) -> Result<Self> {
        if value <= 3 {
            Ok(Self(value))
        } else {
            Err(LineNetError::InvalidLineType(value as f32))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Maps {0, 1, 2, 3} to {-1, -1/3, 1/3, 1}: zero-centered around 1.5 and
    /// scaled by 1.5.
    pub fn normalized(self) -> Float {
        (self.0 as Float - 1.5) / 1.5
    }
}

impl TryFrom<f32> for LineType {
    type Error = LineNetError;

    fn try_from(value: f32) -> Result<Self> {
        if value.fract() != 0.0 || !(0.0..=3.0).contains(&value) {
            return Err(LineNetError::InvalidLineType(value));
        }
        Ok(Self(value as u8))
    }
}

impl From<LineType> for f32 {
    fn from(value: LineType) -> Self {
        value.0 as f32
    }
}

/// Channel layout of the images a generator emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ImageType {
    #[default]
    Bgr,
    /// bgr with the depth image stacked as a 4th channel
    BgrD,
}

impl ImageType {
    pub fn channels(self) -> usize {
        match self {
            ImageType::Bgr => 3,
            ImageType::BgrD => 4,
        }
    }
}

impl FromStr for ImageType {
    type Err = LineNetError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bgr" => Ok(ImageType::Bgr),
            "bgr-d" => Ok(ImageType::BgrD),
            other => Err(LineNetError::InvalidImageType(other.to_string())),
        }
    }
}

impl TryFrom<String> for ImageType {
    type Error = LineNetError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ImageType> for String {
    fn from(value: ImageType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageType::Bgr => f.write_str("bgr"),
            ImageType::BgrD => f.write_str("bgr-d"),
        }
    }
}

/// Source format of a legacy dataset. Fixes the label vector length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelFormat {
    /// Label files: center x, y, z and the class.
    Text,
    /// Line archives: seven values, the class last.
    Archive,
}

impl LabelFormat {
    pub fn label_len(self) -> usize {
        match self {
            LabelFormat::Text => 4,
            LabelFormat::Archive => 7,
        }
    }
}

/// Size of the image patches fed to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ImageShape {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

impl Default for ImageShape {
    fn default() -> Self {
        Self {
            width: 96,
            height: 64,
            channels: 3,
        }
    }
}

/// Widens a bgr mean to the channel count, depth channels get 0.
pub(crate) fn channel_mean(mean: &[Float], channels: usize) -> Result<Vec<Float>> {
    match (mean.len(), channels) {
        (n, c) if n == c => Ok(mean.to_vec()),
        (3, 4) => Ok(mean.iter().copied().chain([0.0]).collect()),
        (n, c) => Err(LineNetError::Config(format!(
            "mean has {n} entries for {c} channel images"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_types_normalize_into_unit_interval() {
        let normalized: Vec<_> = (0..4)
            .map(|v| LineType::new(v).unwrap().normalized())
            .collect();
        let expected = [-1.0, -1.0 / 3.0, 1.0 / 3.0, 1.0];
        for (n, e) in normalized.iter().zip(expected) {
            assert!((n - e).abs() < 1e-6);
        }
        assert!(LineType::new(4).is_err());
        assert!(LineType::try_from(1.5).is_err());
        assert!(LineType::try_from(-1.0).is_err());
        assert_eq!(LineType::try_from(2.0).unwrap().value(), 2);
    }

    #[test]
    fn image_type_parsing() {
        assert_eq!("bgr".parse::<ImageType>().unwrap(), ImageType::Bgr);
        assert_eq!("bgr-d".parse::<ImageType>().unwrap().channels(), 4);

        let err = "rgb".parse::<ImageType>().unwrap_err();
        assert!(matches!(err, LineNetError::InvalidImageType(ref s) if s == "rgb"));
        assert_eq!(
            err.to_string(),
            "images should be 'bgr' or 'bgr-d', got 'rgb'"
        );
        assert_eq!(ImageType::BgrD.to_string(), "bgr-d");
    }

    #[test]
    fn mean_is_widened_for_depth() {
        assert_eq!(
            channel_mean(&[1.0, 2.0, 3.0], 4).unwrap(),
            vec![1.0, 2.0, 3.0, 0.0]
        );
        assert_eq!(channel_mean(&[1.0, 2.0, 3.0], 3).unwrap().len(), 3);
        assert!(channel_mean(&[1.0, 2.0], 3).is_err());
    }
}
