//! Packed 24-bit color handling.
//!
//! Colors are stored as `0xRRGGBB` integers. Input may arrive as a channel
//! triplet, an already packed integer, or an [`Rgb`] value; all three are
//! normalized at the storage boundary by [`pack_color`].

use crate::error::CloudError;
use serde::Deserialize;

pub const WHITE: u32 = 0xFF_FF_FF;

/// Color with named channel accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Rgb {
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    pub fn packed(self) -> u32 {
        pack_rgb(self.red, self.green, self.blue)
    }
}

/// Any accepted input shape for a color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColorValue {
    /// Channel triplet; each channel must lie in `0..=255`.
    Array([i32; 3]),
    /// Packed `0xRRGGBB`; bits above 24 must be clear.
    Packed(u32),
    Rgb(Rgb),
}

impl From<[u8; 3]> for ColorValue {
    fn from(c: [u8; 3]) -> Self {
        ColorValue::Array([c[0] as i32, c[1] as i32, c[2] as i32])
    }
}

impl From<[i32; 3]> for ColorValue {
    fn from(c: [i32; 3]) -> Self {
        ColorValue::Array(c)
    }
}

impl From<u32> for ColorValue {
    fn from(c: u32) -> Self {
        ColorValue::Packed(c)
    }
}

impl From<Rgb> for ColorValue {
    fn from(c: Rgb) -> Self {
        ColorValue::Rgb(c)
    }
}

#[inline]
pub fn pack_rgb(red: u8, green: u8, blue: u8) -> u32 {
    ((red as u32) << 16) | ((green as u32) << 8) | blue as u32
}

#[inline]
pub fn unpack_rgb(packed: u32) -> [u8; 3] {
    [
        ((packed >> 16) & 0xFF) as u8,
        ((packed >> 8) & 0xFF) as u8,
        (packed & 0xFF) as u8,
    ]
}

/// Normalize any [`ColorValue`] into packed storage form.
pub fn pack_color(value: impl Into<ColorValue>) -> Result<u32, CloudError> {
    match value.into() {
        ColorValue::Packed(p) if p <= WHITE => Ok(p),
        ColorValue::Packed(p) => Err(CloudError::InvalidColorValue(format!(
            "packed color {:#x} exceeds 24 bits",
            p
        ))),
        ColorValue::Array(c) => {
            let mut channels = [0u8; 3];
            for (out, v) in channels.iter_mut().zip(c) {
                *out = u8::try_from(v).map_err(|_| {
                    CloudError::InvalidColorValue(format!("channel value {} outside 0..=255", v))
                })?;
            }
            Ok(pack_rgb(channels[0], channels[1], channels[2]))
        }
        ColorValue::Rgb(c) => Ok(c.packed()),
    }
}

/// How a cloud's display color is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    /// Colors read from the source file.
    #[default]
    Original,
    /// Intensity mapped through the active gradient.
    Intensity,
    /// Elevation (z) mapped through the active gradient.
    Height,
    /// One uniform color.
    Single,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorGradient {
    Grayscale,
    #[default]
    Rainbow,
    Heat,
    Viridis,
}

impl ColorGradient {
    fn stops(self) -> &'static [[u8; 3]] {
        match self {
            ColorGradient::Grayscale => &[[0, 0, 0], [255, 255, 255]],
            ColorGradient::Rainbow => &[
                [0, 0, 255],
                [0, 255, 255],
                [0, 255, 0],
                [255, 255, 0],
                [255, 0, 0],
            ],
            ColorGradient::Heat => &[[0, 0, 0], [255, 0, 0], [255, 255, 0], [255, 255, 255]],
            ColorGradient::Viridis => &[
                [68, 1, 84],
                [59, 82, 139],
                [33, 145, 140],
                [94, 201, 98],
                [253, 231, 37],
            ],
        }
    }

    /// Packed color at position `t` in `[0, 1]` (clamped).
    pub fn sample(self, t: f64) -> u32 {
        let stops = self.stops();
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        let scaled = t * (stops.len() - 1) as f64;
        let lo = (scaled.floor() as usize).min(stops.len() - 2);
        let frac = scaled - lo as f64;
        let (a, b) = (stops[lo], stops[lo + 1]);
        let lerp = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * frac).round() as u8;
        pack_rgb(lerp(a[0], b[0]), lerp(a[1], b[1]), lerp(a[2], b[2]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn pack_layout_is_red_high() {
        assert_eq!(pack_rgb(0x12, 0x34, 0x56), 0x123456);
        assert_eq!(unpack_rgb(0x123456), [0x12, 0x34, 0x56]);
    }

    #[test]
    fn every_input_shape_normalizes_identically() {
        let expected = 0xFF8000;
        assert_eq!(pack_color([255u8, 128, 0]).unwrap(), expected);
        assert_eq!(pack_color([255i32, 128, 0]).unwrap(), expected);
        assert_eq!(pack_color(0xFF8000u32).unwrap(), expected);
        assert_eq!(pack_color(Rgb::new(255, 128, 0)).unwrap(), expected);
    }

    #[test]
    fn invalid_shapes_are_rejected() {
        assert!(matches!(
            pack_color([256i32, 0, 0]),
            Err(CloudError::InvalidColorValue(_))
        ));
        assert!(matches!(
            pack_color([0i32, -1, 0]),
            Err(CloudError::InvalidColorValue(_))
        ));
        assert!(matches!(
            pack_color(0x1000000u32),
            Err(CloudError::InvalidColorValue(_))
        ));
    }

    #[test]
    fn gradient_endpoints() {
        assert_eq!(ColorGradient::Grayscale.sample(0.0), 0x000000);
        assert_eq!(ColorGradient::Grayscale.sample(1.0), 0xFFFFFF);
        assert_eq!(ColorGradient::Grayscale.sample(2.0), 0xFFFFFF);
        assert_eq!(ColorGradient::Rainbow.sample(0.0), 0x0000FF);
        assert_eq!(ColorGradient::Rainbow.sample(1.0), 0xFF0000);
        assert_eq!(ColorGradient::Heat.sample(f64::NAN), 0x000000);
    }

    #[test]
    fn exhaustive_pack_roundtrip_for_primary_ramps() {
        for v in 0..=255u8 {
            assert_eq!(unpack_rgb(pack_rgb(v, 0, 0)), [v, 0, 0]);
            assert_eq!(unpack_rgb(pack_rgb(0, v, 0)), [0, v, 0]);
            assert_eq!(unpack_rgb(pack_rgb(0, 0, v)), [0, 0, v]);
        }
    }

    proptest! {
        #[test]
        fn pack_unpack_roundtrip(r in 0u8..=255, g in 0u8..=255, b in 0u8..=255) {
            prop_assert_eq!(unpack_rgb(pack_rgb(r, g, b)), [r, g, b]);
            prop_assert_eq!(unpack_rgb(pack_color([r, g, b]).unwrap()), [r, g, b]);
        }
    }
}
