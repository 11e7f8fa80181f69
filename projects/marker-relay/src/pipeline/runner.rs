// Frame loop: selects the detection strategy once at startup, then drives
// one detection round and one result broadcast per frame.

use crate::calibration;
use crate::net::broadcast::Broadcaster;
use crate::pipeline::coordinator::DetectionCoordinator;
use crate::pipeline::detector::{ColorDetector, ColorSpace, FiducialDetector, RegionDetector};
use crate::pipeline::region::partition_frame;
use crate::pipeline::types::{Frame, PipelineStats};
use crate::run_context::{DetectionMethod, RunContext};
use crate::video::image_dir::ImageDirSource;
use crate::video::writer::AnnotatedWriter;
use crate::video::FrameSource;
use anyhow::{bail, Result};
use image::GenericImageView;
use indicatif::ProgressBar;
use std::sync::Arc;
use std::time::Instant;

pub fn run(ctx: RunContext) -> Result<()> {
    match ctx.method {
        DetectionMethod::Calibrate => calibration::run_capture(&ctx),
        _ => run_tracking(&ctx),
    }
}

fn build_detectors(method: DetectionMethod, count: usize) -> Vec<Box<dyn RegionDetector>> {
    (0..count)
        .map(|_| match method {
            DetectionMethod::Aruco => Box::new(FiducialDetector::new()) as Box<dyn RegionDetector>,
            DetectionMethod::Hsv => {
                Box::new(ColorDetector::new(ColorSpace::Hsv)) as Box<dyn RegionDetector>
            }
            DetectionMethod::Luv => {
                Box::new(ColorDetector::new(ColorSpace::Luv)) as Box<dyn RegionDetector>
            }
            DetectionMethod::Calibrate => unreachable!("calibrate mode has no detection pipeline"),
        })
        .collect()
}

fn run_tracking(ctx: &RunContext) -> Result<()> {
    let mut source = ImageDirSource::open(&ctx.input, ctx.fps)?;
    let total_frames = source.frame_count()?;

    // frame dimensions and the region partition are fixed by the first frame
    let Some(first) = source.next_frame()? else {
        bail!("input contains no frames");
    };
    let (frame_width, frame_height) = (first.width(), first.height());

    let regions = partition_frame(frame_width, frame_height, &ctx.tracked_ids);
    for region in &regions {
        tracing::info!(
            "region {}: rows {}..{}, owns markers {:?}",
            region.index,
            region.rect.y,
            region.rect.y + region.rect.height,
            region.owned_ids
        );
    }

    let detectors = build_detectors(ctx.method, regions.len());
    let mut coordinator = DetectionCoordinator::spawn(
        regions,
        detectors,
        &ctx.tracked_ids,
        frame_width,
        frame_height,
        ctx.round_timeout,
    )?;

    let mut broadcaster = Broadcaster::new(ctx.camera_id, ctx.server_addr)?;
    let writer = ctx
        .output
        .as_ref()
        .map(AnnotatedWriter::create)
        .transpose()?;

    let progress = if ctx.gui_level >= 1 {
        ProgressBar::new(total_frames as u64)
    } else {
        ProgressBar::hidden()
    };

    let mut stats = PipelineStats::default();
    let mut frame_index = 0u64;
    let mut next_image = Some(first);

    while let Some(image) = next_image.take() {
        if (image.width(), image.height()) != (frame_width, frame_height) {
            bail!(
                "frame {} is {}x{}, expected {}x{}",
                frame_index,
                image.width(),
                image.height(),
                frame_width,
                frame_height
            );
        }
        let frame = Arc::new(Frame {
            index: frame_index,
            image,
        });
        let round_start = Instant::now();

        coordinator.run_detection_round(&frame)?;

        // the table is only read here, after the round barrier
        for marker in coordinator.table().markers().iter().filter(|m| m.found) {
            broadcaster.stage(marker);
        }
        broadcaster.send();
        broadcaster.reset();

        if let Some(writer) = &writer {
            writer.write(&frame, coordinator.table())?;
        }

        stats.update(round_start.elapsed().as_secs_f64() * 1000.0);
        if frame_index % 100 == 0 {
            tracing::info!("frame {} ({:.1} fps)", frame_index, stats.fps());
        }
        if ctx.gui_level >= 2 {
            for marker in coordinator.table().markers().iter().filter(|m| m.found) {
                tracing::debug!(
                    "frame {}: marker {} at x={:.1} size={:.1} conf={:.2}",
                    frame_index,
                    marker.id,
                    marker.x,
                    marker.size,
                    marker.confidence
                );
            }
        }
        progress.inc(1);

        frame_index += 1;
        next_image = source.next_frame()?;
    }

    progress.finish_and_clear();
    tracing::info!(
        "processed {} frames, {:.1} fps smoothed",
        stats.frames,
        stats.fps()
    );
    Ok(())
}
