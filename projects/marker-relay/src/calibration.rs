// Camera calibration: persisted intrinsics gate the pose-dependent detection
// method, and the calibrate run mode samples frames for an offline solve.

use crate::run_context::RunContext;
use crate::video::image_dir::ImageDirSource;
use crate::video::FrameSource;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Frames sampled by a calibration capture run.
const CAPTURE_FRAME_COUNT: usize = 15;
/// Seconds between sampled frames.
const CAPTURE_INTERVAL_SECS: f64 = 2.0;

/// Camera intrinsics as solved offline, JSON on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraCalibration {
    pub camera_matrix: [[f64; 3]; 3],
    pub distortion: [f64; 5],
    /// RMS reprojection error of the solve; non-positive means the solve
    /// failed or never ran.
    pub reprojection_error: f64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub calibrated_at: DateTime<Utc>,
}

impl CameraCalibration {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading calibration file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing calibration file {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("writing calibration file {}", path.display()))
    }

    pub fn is_usable(&self) -> bool {
        self.reprojection_error.is_finite() && self.reprojection_error > 0.0
    }
}

#[derive(Debug, Serialize)]
struct CaptureManifest {
    created_at: DateTime<Utc>,
    source: PathBuf,
    interval_secs: f64,
    frames: Vec<PathBuf>,
}

/// The `calibrate` run mode: samples evenly spaced frames from the input and
/// writes them plus a manifest to the output directory, ready for an offline
/// intrinsics solve.
pub fn run_capture(ctx: &RunContext) -> Result<()> {
    let spec = ctx
        .output
        .as_ref()
        .ok_or_else(|| anyhow!("calibrate mode needs --output for the captured frames"))?;
    fs::create_dir_all(&spec.dir)
        .with_context(|| format!("creating capture directory {}", spec.dir.display()))?;

    let mut source = ImageDirSource::open(&ctx.input, ctx.fps)?;
    let fps = source.source_fps()?;
    let step = ((fps * CAPTURE_INTERVAL_SECS).round() as usize).max(1);

    let mut frames = Vec::new();
    let mut index = 0usize;
    while frames.len() < CAPTURE_FRAME_COUNT {
        let Some(frame) = source.next_frame()? else {
            break;
        };
        if index % step == 0 {
            let path = spec.dir.join(format!("calib_{:03}.png", frames.len() + 1));
            frame
                .save(&path)
                .with_context(|| format!("writing calibration frame {}", path.display()))?;
            frames.push(path);
        }
        index += 1;
    }

    if frames.is_empty() {
        anyhow::bail!("input ended before any calibration frame could be sampled");
    }

    let manifest = CaptureManifest {
        created_at: Utc::now(),
        source: ctx.input.clone(),
        interval_secs: CAPTURE_INTERVAL_SECS,
        frames: frames.clone(),
    };
    let manifest_path = spec.dir.join("manifest.json");
    fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)
        .with_context(|| format!("writing {}", manifest_path.display()))?;

    tracing::info!(
        "captured {} calibration frames into {}; solve intrinsics offline and save the result next to the tracker as calibration.json",
        frames.len(),
        spec.dir.display()
    );
    Ok(())
}
