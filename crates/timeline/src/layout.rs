//! Output resolution and viewport layout.

use serde::{Deserialize, Serialize};

/// Output surface size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether both sides fit a surface limited to `max_side` pixels.
    pub fn fits_within(&self, max_side: u32) -> bool {
        self.width <= max_side && self.height <= max_side
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

/// Resolve the output resolution for a template aspect ratio.
///
/// The shorter side is `min_side_px`, the longer one follows the aspect.
/// Both are rounded to the nearest multiple of 8, as encoders require.
pub fn resolve_resolution(aspect_ratio: f32, min_side_px: u32) -> Resolution {
    let aspect = if aspect_ratio.is_finite() && aspect_ratio > 0.0 {
        aspect_ratio as f64
    } else {
        1.0
    };
    let short = min_side_px as f64;

    let (width, height) = if aspect >= 1.0 {
        (short * aspect, short)
    } else {
        (short, short / aspect)
    };

    Resolution {
        width: coerce_to_multiple_of_8(width),
        height: coerce_to_multiple_of_8(height),
    }
}

/// Round to the nearest multiple of 8, never below 8.
pub fn coerce_to_multiple_of_8(value: f64) -> u32 {
    let blocks = (value / 8.0).round().max(1.0);
    (blocks as u32).saturating_mul(8)
}

/// Aspect ratios closer than this are treated as equal.
pub const ASPECT_EPSILON: f64 = 1e-4;

/// Pixel rectangle inside the output surface, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Largest centered rectangle of `aspect_ratio` inside `surface`.
    ///
    /// An aspect within [`ASPECT_EPSILON`] of the surface's own fills the
    /// whole surface.
    pub fn fit(aspect_ratio: f32, surface: Resolution) -> Self {
        let max_w = surface.width;
        let max_h = surface.height;
        let aspect = if aspect_ratio.is_finite() && aspect_ratio > 0.0 {
            aspect_ratio as f64
        } else {
            1.0
        };
        let surface_aspect = max_w as f64 / max_h.max(1) as f64;

        let (width, height) = if (aspect - surface_aspect).abs() <= ASPECT_EPSILON {
            (max_w, max_h)
        } else if aspect > surface_aspect {
            let h = ((max_w as f64 / aspect).round() as u32).min(max_h);
            (max_w, h)
        } else {
            let w = ((max_h as f64 * aspect).round() as u32).min(max_w);
            (w, max_h)
        };

        Self {
            x: (max_w - width) / 2,
            y: (max_h - height) / 2,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_common_resolutions() {
        assert_eq!(resolve_resolution(16.0 / 9.0, 1080), Resolution::new(1920, 1080));
        assert_eq!(resolve_resolution(9.0 / 16.0, 1080), Resolution::new(1080, 1920));
        assert_eq!(resolve_resolution(1.0, 1080), Resolution::new(1080, 1080));
        assert_eq!(resolve_resolution(4.0 / 3.0, 720), Resolution::new(960, 720));
    }

    #[test]
    fn test_odd_min_side_is_coerced() {
        let res = resolve_resolution(1.0, 1077);
        assert_eq!(res, Resolution::new(1080, 1080));
    }

    #[test]
    fn test_invalid_aspect_falls_back_to_square() {
        assert_eq!(resolve_resolution(f32::NAN, 480), Resolution::new(480, 480));
    }

    #[test]
    fn test_viewport_fills_matching_surface() {
        let viewport = Viewport::fit(16.0 / 9.0, Resolution::new(1920, 1080));
        assert_eq!(
            viewport,
            Viewport {
                x: 0,
                y: 0,
                width: 1920,
                height: 1080
            }
        );
    }

    #[test]
    fn test_viewport_fills_every_resolved_surface() {
        for aspect in [16.0 / 9.0, 9.0 / 16.0, 4.0 / 3.0, 1.0, 21.0 / 9.0] {
            let surface = resolve_resolution(aspect, 1080);
            let viewport = Viewport::fit(aspect, surface);
            assert_eq!((viewport.width, viewport.height), (surface.width, surface.height));
            assert_eq!((viewport.x, viewport.y), (0, 0));
        }
        let viewport = Viewport::fit(16.0 / 9.0, Resolution::new(1920, 1080));
        assert_eq!(viewport.right(), 1920);
        assert_eq!(viewport.bottom(), 1080);
    }

    #[test]
    fn test_viewport_letterboxes_wide_aspect() {
        let viewport = Viewport::fit(2.0, Resolution::new(1080, 1080));
        assert_eq!(viewport.width, 1080);
        assert_eq!(viewport.height, 540);
        assert_eq!(viewport.x, 0);
        assert_eq!(viewport.y, 270);
    }

    #[test]
    fn test_viewport_letterboxes() {
        let viewport = Viewport::fit(1.0, Resolution::new(1920, 1080));
        assert_eq!(viewport.width, 1080);
        assert_eq!(viewport.height, 1080);
        assert_eq!(viewport.x, 420);
        assert_eq!(viewport.y, 0);
    }

    proptest! {
        #[test]
        fn resolution_sides_are_multiples_of_8(aspect in 0.1f32..10.0, min_side in 8u32..4096) {
            let res = resolve_resolution(aspect, min_side);
            prop_assert_eq!(res.width % 8, 0);
            prop_assert_eq!(res.height % 8, 0);
            prop_assert!(res.width >= 8 && res.height >= 8);
        }

        #[test]
        fn viewport_stays_inside_surface(aspect in 0.1f32..10.0, w in 8u32..4096, h in 8u32..4096) {
            let surface = Resolution::new(w, h);
            let viewport = Viewport::fit(aspect, surface);
            prop_assert!(viewport.right() <= w);
            prop_assert!(viewport.bottom() <= h);
        }
    }
}
