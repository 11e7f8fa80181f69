use crate::calibration::CameraCalibration;
use crate::cli::Args;
use crate::pipeline::types::{MarkerId, MAX_TRACKED_MARKERS};
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Detection strategy, fixed once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DetectionMethod {
    /// Fiducial tag detection; needs a prior camera calibration.
    Aruco,
    /// Color-blob detection in HSV space.
    Hsv,
    /// Color-blob detection in CIE L*u*v* space.
    Luv,
    /// Sample calibration frames instead of tracking.
    Calibrate,
}

impl DetectionMethod {
    pub fn requires_calibration(self) -> bool {
        matches!(self, DetectionMethod::Aruco)
    }
}

/// Annotated-output destination, split from the CLI's `dir:FOURCC` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    pub dir: PathBuf,
    pub codec: Option<String>,
}

impl OutputSpec {
    /// Splits an optional codec suffix off the output path. The original
    /// recording chain keyed codecs by FOURCC, so a suffix must be exactly
    /// four characters.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.split_once(':') {
            None => Ok(Self {
                dir: PathBuf::from(raw),
                codec: None,
            }),
            Some((dir, codec)) => {
                if dir.is_empty() {
                    bail!("output path before ':' is empty");
                }
                if codec.chars().count() != 4 {
                    bail!("output codec must have a length of 4, got {codec:?}");
                }
                Ok(Self {
                    dir: PathBuf::from(dir),
                    codec: Some(codec.to_string()),
                })
            }
        }
    }
}

/// Everything the pipeline needs, resolved and validated from the CLI once;
/// immutable afterwards.
#[derive(Debug)]
pub struct RunContext {
    pub method: DetectionMethod,
    pub tracked_ids: Vec<MarkerId>,
    pub input: PathBuf,
    pub output: Option<OutputSpec>,
    pub gui_level: u8,
    pub camera_id: u32,
    pub server_addr: SocketAddr,
    pub calibration: Option<CameraCalibration>,
    pub fps: f64,
    pub round_timeout: Duration,
}

impl RunContext {
    pub fn from_args(args: Args) -> Result<Self> {
        let tracked_ids = validate_markers(&args.markers)?;

        if args.gui_level > 2 {
            bail!("invalid gui level {} (0-2)", args.gui_level);
        }
        if !(args.fps.is_finite() && args.fps > 0.0) {
            bail!("invalid fps {}", args.fps);
        }

        let output = args.output.as_deref().map(OutputSpec::parse).transpose()?;
        if args.method == DetectionMethod::Calibrate && output.is_none() {
            bail!("calibrate mode needs --output for the captured frames");
        }

        // Pose-dependent detection without a prior calibration is a fatal
        // precondition, checked before any worker is spawned.
        let calibration = if args.method.requires_calibration() {
            let calib = CameraCalibration::load(&args.calibration).with_context(|| {
                format!(
                    "camera must be pre-calibrated for {:?} detection; run --method calibrate first",
                    args.method
                )
            })?;
            if !calib.is_usable() {
                bail!(
                    "calibration at {} is unusable (reprojection error {}); re-run the solve",
                    args.calibration.display(),
                    calib.reprojection_error
                );
            }
            Some(calib)
        } else {
            None
        };

        Ok(Self {
            method: args.method,
            tracked_ids,
            input: args.input,
            output,
            gui_level: args.gui_level,
            camera_id: args.camera_id,
            server_addr: SocketAddr::new(args.server_host, args.server_port),
            calibration,
            fps: args.fps,
            round_timeout: Duration::from_millis(args.round_timeout_ms),
        })
    }
}

fn validate_markers(markers: &[u8]) -> Result<Vec<MarkerId>> {
    if markers.is_empty() {
        bail!("at least one marker id must be tracked");
    }
    if markers.len() > MAX_TRACKED_MARKERS {
        bail!("more than {MAX_TRACKED_MARKERS} marker ids present");
    }
    let mut ids = Vec::with_capacity(markers.len());
    for &id in markers {
        if !(1..=MAX_TRACKED_MARKERS as u8).contains(&id) {
            bail!("invalid marker id {id} (1-{MAX_TRACKED_MARKERS})");
        }
        if ids.contains(&id) {
            bail!("marker id {id} listed twice");
        }
        ids.push(id);
    }
    ids.sort_unstable();
    Ok(ids)
}
