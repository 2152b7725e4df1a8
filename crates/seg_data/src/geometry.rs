//! Crop geometry planning.
//!
//! With aspect-ratio-derived cropping, the first item of every batch fixes the
//! crop shape for the whole batch. The shape keeps that item's aspect ratio,
//! fits inside `min_height x min_width` and is rounded down to the configured
//! multiples. Batches only come out sensible when the record order groups
//! similar aspect ratios together; the planner does not check that.

use crate::error::{ensure_config, Result};
use serde::{Deserialize, Serialize};

/// Spatial shape (height, width) shared by every item of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CropGeometry {
    pub height: u32,
    pub width: u32,
}

impl CropGeometry {
    pub fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    pub fn area(&self) -> usize {
        self.height as usize * self.width as usize
    }
}

/// Bounds used by [`plan_from_aspect_ratio`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryConstraints {
    pub min_height: u32,
    pub min_width: u32,
    pub height_multiple: u32,
    pub width_multiple: u32,
}

impl Default for GeometryConstraints {
    fn default() -> Self {
        Self {
            min_height: 0,
            min_width: 0,
            height_multiple: 1,
            width_multiple: 1,
        }
    }
}

impl GeometryConstraints {
    pub fn validate(&self) -> Result<()> {
        ensure_config!(
            self.min_height > 0 && self.min_width > 0,
            "aspect-ratio cropping needs positive min_height/min_width (got {}x{})",
            self.min_height,
            self.min_width
        );
        ensure_config!(
            self.height_multiple > 0 && self.width_multiple > 0,
            "height_multiple/width_multiple must be positive (got {}/{})",
            self.height_multiple,
            self.width_multiple
        );
        Ok(())
    }

    /// Buffer shape used before the first item is seen: the minimums rounded
    /// down to their multiples.
    pub fn initial_geometry(&self) -> CropGeometry {
        CropGeometry::new(
            round_down(self.min_height, self.height_multiple),
            round_down(self.min_width, self.width_multiple),
        )
    }
}

fn round_down(value: u32, multiple: u32) -> u32 {
    if multiple == 0 {
        value
    } else {
        value / multiple * multiple
    }
}

/// Derives the crop shape for a batch whose first item has `ratio = height / width`.
///
/// Fails with a configuration error if the result would be empty or exceed
/// the minimums.
pub fn plan_from_aspect_ratio(ratio: f64, constraints: &GeometryConstraints) -> Result<CropGeometry> {
    constraints.validate()?;
    ensure_config!(
        ratio.is_finite() && ratio > 0.0,
        "aspect ratio must be positive and finite (got {})",
        ratio
    );
    let min_h = constraints.min_height as f64;
    let min_w = constraints.min_width as f64;

    let (height, width) = if min_h / min_w < ratio {
        (min_h, (min_h / ratio).floor())
    } else {
        ((min_w * ratio).floor(), min_w)
    };
    let height = round_down(height as u32, constraints.height_multiple);
    let width = round_down(width as u32, constraints.width_multiple);

    ensure_config!(
        height > 0 && width > 0,
        "derived crop {}x{} is empty for aspect ratio {} within {}x{}",
        height,
        width,
        ratio,
        constraints.min_height,
        constraints.min_width
    );
    ensure_config!(
        height <= constraints.min_height && width <= constraints.min_width,
        "derived crop {}x{} exceeds minimum {}x{}",
        height,
        width,
        constraints.min_height,
        constraints.min_width
    );
    Ok(CropGeometry::new(height, width))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraints(min_h: u32, min_w: u32, hm: u32, wm: u32) -> GeometryConstraints {
        GeometryConstraints {
            min_height: min_h,
            min_width: min_w,
            height_multiple: hm,
            width_multiple: wm,
        }
    }

    #[test]
    fn test_height_constrained() -> Result<()> {
        // Tall image: ratio 2.0 > 320/480.
        let g = plan_from_aspect_ratio(2.0, &constraints(320, 480, 1, 1))?;
        assert_eq!(g, CropGeometry::new(320, 160));
        Ok(())
    }

    #[test]
    fn test_width_constrained_with_multiples() -> Result<()> {
        // Wide image: 480 * 0.5 = 240, rounded down to a multiple of 32 -> 224.
        let g = plan_from_aspect_ratio(0.5, &constraints(320, 480, 32, 32))?;
        assert_eq!(g, CropGeometry::new(224, 480));
        Ok(())
    }

    #[test]
    fn test_properties_over_ratio_sweep() -> Result<()> {
        for (hm, wm) in [(1, 1), (8, 8), (16, 32), (3, 5)] {
            let c = constraints(321, 481, hm, wm);
            for step in 5..200 {
                let ratio = step as f64 * 0.02;
                let g = plan_from_aspect_ratio(ratio, &c)?;
                assert!(g.height > 0 && g.width > 0, "ratio {}", ratio);
                assert_eq!(g.height % hm, 0);
                assert_eq!(g.width % wm, 0);
                assert!(g.height <= c.min_height && g.width <= c.min_width);
            }
        }
        Ok(())
    }

    #[test]
    fn test_degenerate_result_is_configuration_error() {
        // Extremely wide image: height floors to 0.
        let err = plan_from_aspect_ratio(0.001, &constraints(100, 100, 1, 1)).unwrap_err();
        assert!(err.is_configuration());
        assert!(plan_from_aspect_ratio(1.0, &constraints(0, 100, 1, 1)).is_err());
        assert!(plan_from_aspect_ratio(f64::NAN, &constraints(10, 10, 1, 1)).is_err());
    }

    #[test]
    fn test_initial_geometry_rounds_down() {
        let c = constraints(321, 481, 32, 16);
        assert_eq!(c.initial_geometry(), CropGeometry::new(320, 480));
    }
}
