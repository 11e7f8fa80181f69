use crate::pipeline::types::{Frame, MarkerPosition, PositionTable};
use crate::run_context::OutputSpec;
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use std::fs;
use std::path::PathBuf;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Writes frames with found markers boxed, as a numbered PNG sequence.
pub struct AnnotatedWriter {
    dir: PathBuf,
}

impl AnnotatedWriter {
    pub fn create(spec: &OutputSpec) -> Result<Self> {
        fs::create_dir_all(&spec.dir)
            .with_context(|| format!("creating output directory {}", spec.dir.display()))?;
        if let Some(codec) = &spec.codec {
            tracing::info!("output codec {codec} requested; writing a png sequence");
        }
        Ok(Self {
            dir: spec.dir.clone(),
        })
    }

    pub fn write(&self, frame: &Frame, table: &PositionTable) -> Result<()> {
        let mut img = frame.image.to_rgb8();
        for marker in table.markers().iter().filter(|m| m.found) {
            draw_marker_box(&mut img, marker);
        }
        let path = self.dir.join(format!("frame_{:06}.png", frame.index));
        img.save(&path)
            .with_context(|| format!("writing annotated frame {}", path.display()))
    }
}

/// Double-outline rectangle around a marker's reported extent.
fn draw_marker_box(img: &mut RgbImage, marker: &MarkerPosition) {
    let x0 = (marker.x - marker.size / 2.0) as i64;
    let x1 = (marker.x + marker.size / 2.0) as i64;
    let y0 = marker.min_row as i64;
    let y1 = marker.max_row as i64;
    draw_rect(img, x0, y0, x1, y1);
    draw_rect(img, x0 + 1, y0 + 1, x1 - 1, y1 - 1);
}

fn draw_rect(img: &mut RgbImage, x0: i64, y0: i64, x1: i64, y1: i64) {
    let (w, h) = (img.width() as i64, img.height() as i64);
    let clamp_x = |x: i64| x.clamp(0, w - 1) as u32;
    let clamp_y = |y: i64| y.clamp(0, h - 1) as u32;

    if x0 > x1 || y0 > y1 || w == 0 || h == 0 {
        return;
    }
    for x in clamp_x(x0)..=clamp_x(x1) {
        img.put_pixel(x, clamp_y(y0), BOX_COLOR);
        img.put_pixel(x, clamp_y(y1), BOX_COLOR);
    }
    for y in clamp_y(y0)..=clamp_y(y1) {
        img.put_pixel(clamp_x(x0), y, BOX_COLOR);
        img.put_pixel(clamp_x(x1), y, BOX_COLOR);
    }
}
