use anyhow::Result;
use aprilgrid::detector::TagDetector;
use aprilgrid::TagFamily;
use image::DynamicImage;

/// A marker reported by a recognition backend, still in region-local
/// coordinates. The worker translates this into a [`MarkerPosition`].
///
/// [`MarkerPosition`]: crate::pipeline::types::MarkerPosition
#[derive(Debug, Clone, Copy)]
pub struct RawDetection {
    /// Library-side id; only ids matching a tracked marker survive the
    /// ownership filter.
    pub id: u32,
    /// Corner points, region-local pixels.
    pub corners: [[f32; 2]; 4],
    /// Backend-defined quality score in (0, 1].
    pub confidence: f32,
}

/// The seam to the external recognition library.
///
/// Implementations run inside a region worker thread; a soft failure should
/// surface as `Err` and is treated as "nothing found this frame".
pub trait RegionDetector: Send {
    fn detect(&mut self, view: &DynamicImage) -> Result<Vec<RawDetection>>;
}

/// Fiducial backend wrapping the aprilgrid tag detector. Tag ids map
/// one-to-one onto marker ids.
///
/// Each region worker owns its own instance; the underlying detector is not
/// shared across threads.
pub struct FiducialDetector {
    tags: TagDetector,
}

impl FiducialDetector {
    pub fn new() -> Self {
        Self {
            tags: TagDetector::new(&TagFamily::T36H11, None),
        }
    }
}

impl RegionDetector for FiducialDetector {
    fn detect(&mut self, view: &DynamicImage) -> Result<Vec<RawDetection>> {
        let hits = self.tags.detect(view);
        let mut out = Vec::with_capacity(hits.len());
        for (id, points) in hits {
            if points.len() < 4 {
                continue;
            }
            let corners = [
                [points[0].0, points[0].1],
                [points[1].0, points[1].1],
                [points[2].0, points[2].1],
                [points[3].0, points[3].1],
            ];
            out.push(RawDetection {
                id,
                corners,
                confidence: squareness(&corners),
            });
        }
        Ok(out)
    }
}

/// Ratio of shortest to longest quad side: 1.0 for a square viewed head-on,
/// falling off with skew and partial occlusion.
fn squareness(corners: &[[f32; 2]; 4]) -> f32 {
    let mut min_side = f32::MAX;
    let mut max_side = 0.0f32;
    for i in 0..4 {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        let side = ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt();
        min_side = min_side.min(side);
        max_side = max_side.max(side);
    }
    if max_side > 0.0 {
        (min_side / max_side).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Hsv,
    Luv,
}

/// Reference beacon colors, one per marker id. Tuned per venue; the values
/// here match the default beacon sleeves.
const MARKER_COLORS: [(u32, [u8; 3]); 4] = [
    (1, [220, 40, 40]),  // red
    (2, [40, 70, 220]),  // blue
    (3, [40, 200, 70]),  // green
    (4, [230, 210, 50]), // yellow
];

const MIN_COLOR_PIXELS: u32 = 30;

/// Color-blob backend: matches each marker's reference color over the region
/// and reports the matching pixels' bounding extent. Corners are synthesized
/// from the extent so the worker-side translation is identical to the
/// fiducial path.
pub struct ColorDetector {
    space: ColorSpace,
}

impl ColorDetector {
    pub fn new(space: ColorSpace) -> Self {
        Self { space }
    }
}

impl RegionDetector for ColorDetector {
    fn detect(&mut self, view: &DynamicImage) -> Result<Vec<RawDetection>> {
        let rgb = view.to_rgb8();
        let mut out = Vec::new();

        for (id, reference) in MARKER_COLORS {
            let mut count: u32 = 0;
            let mut min_col = u32::MAX;
            let mut max_col = 0u32;
            let mut min_row = u32::MAX;
            let mut max_row = 0u32;

            for (col, row, px) in rgb.enumerate_pixels() {
                if !self.matches(px.0, reference) {
                    continue;
                }
                count += 1;
                min_col = min_col.min(col);
                max_col = max_col.max(col);
                min_row = min_row.min(row);
                max_row = max_row.max(row);
            }

            if count < MIN_COLOR_PIXELS {
                continue;
            }

            let (x0, y0) = (min_col as f32, min_row as f32);
            let (x1, y1) = (max_col as f32 + 1.0, max_row as f32 + 1.0);
            let area = (x1 - x0) * (y1 - y0);
            out.push(RawDetection {
                id,
                corners: [[x0, y0], [x1, y0], [x1, y1], [x0, y1]],
                confidence: (count as f32 / area).clamp(0.0, 1.0),
            });
        }

        Ok(out)
    }
}

impl ColorDetector {
    fn matches(&self, px: [u8; 3], reference: [u8; 3]) -> bool {
        match self.space {
            ColorSpace::Hsv => {
                let (h, s, v) = rgb_to_hsv(px);
                let (rh, ..) = rgb_to_hsv(reference);
                hue_distance(h, rh) < 18.0 && s > 0.35 && v > 0.2
            }
            ColorSpace::Luv => {
                let (l, u, v) = rgb_to_luv(px);
                let (_, ru, rv) = rgb_to_luv(reference);
                l > 15.0 && ((u - ru).powi(2) + (v - rv).powi(2)).sqrt() < 25.0
            }
        }
    }
}

fn hue_distance(a: f32, b: f32) -> f32 {
    let d = (a - b).abs() % 360.0;
    d.min(360.0 - d)
}

/// Hue in degrees, saturation and value in [0, 1].
fn rgb_to_hsv(px: [u8; 3]) -> (f32, f32, f32) {
    let r = px[0] as f32 / 255.0;
    let g = px[1] as f32 / 255.0;
    let b = px[2] as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

/// CIE L*u*v* under D65, from sRGB.
fn rgb_to_luv(px: [u8; 3]) -> (f32, f32, f32) {
    fn linearize(c: u8) -> f32 {
        let c = c as f32 / 255.0;
        if c <= 0.04045 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        }
    }
    let r = linearize(px[0]);
    let g = linearize(px[1]);
    let b = linearize(px[2]);

    let x = 0.4124 * r + 0.3576 * g + 0.1805 * b;
    let y = 0.2126 * r + 0.7152 * g + 0.0722 * b;
    let z = 0.0193 * r + 0.1192 * g + 0.9505 * b;

    // D65 white point
    const XN: f32 = 0.95047;
    const YN: f32 = 1.0;
    const ZN: f32 = 1.08883;

    let denom = x + 15.0 * y + 3.0 * z;
    let (up, vp) = if denom == 0.0 {
        (0.0, 0.0)
    } else {
        (4.0 * x / denom, 9.0 * y / denom)
    };
    let denom_n = XN + 15.0 * YN + 3.0 * ZN;
    let un = 4.0 * XN / denom_n;
    let vn = 9.0 * YN / denom_n;

    let yr = y / YN;
    let l = if yr > 0.008856 {
        116.0 * yr.cbrt() - 16.0
    } else {
        903.3 * yr
    };
    let u = 13.0 * l * (up - un);
    let v = 13.0 * l * (vp - vn);
    (l, u, v)
}
