use crate::pipeline::detector::{RawDetection, RegionDetector};
use crate::pipeline::region::RegionSpec;
use crate::pipeline::types::{MarkerId, MarkerPosition, RegionJob, RegionReport};
use crossbeam::channel::{Receiver, Sender};

/// Plausible vertical extent of a marker, pixels. Detections outside this
/// band are reflections or noise and are discarded.
pub const MIN_MARKER_HEIGHT: f32 = 10.0;
pub const MAX_MARKER_HEIGHT: f32 = 200.0;

/// Long-lived region worker: waits for a job, runs the recognition backend
/// on its region of the frame, translates geometry to frame-absolute
/// coordinates and reports one record per owned id.
///
/// Exits when the coordinator drops the job channel. Backend errors are soft:
/// the round still completes, reporting every owned id as not found.
pub fn region_worker(
    region: RegionSpec,
    mut detector: Box<dyn RegionDetector>,
    jobs: Receiver<RegionJob>,
    reports: Sender<RegionReport>,
) {
    for job in jobs.iter() {
        let raw = if region.owned_ids.is_empty() {
            Vec::new()
        } else {
            let view = job.frame.image.crop_imm(
                region.rect.x,
                region.rect.y,
                region.rect.width,
                region.rect.height,
            );
            match detector.detect(&view) {
                Ok(raw) => raw,
                Err(err) => {
                    tracing::debug!(
                        "region {}: detection failed on frame {}: {err}",
                        region.index,
                        job.frame.index
                    );
                    Vec::new()
                }
            }
        };

        let report = build_report(&region, job.frame.index, &raw);
        if reports.send(report).is_err() {
            break;
        }
    }
}

/// Builds the round report: exactly one record per owned id, in ownership
/// order, with `found` cleared for ids the backend did not see.
pub(crate) fn build_report(
    region: &RegionSpec,
    frame_index: u64,
    raw: &[RawDetection],
) -> RegionReport {
    let markers = region
        .owned_ids
        .iter()
        .map(|&id| {
            raw.iter()
                .find(|d| d.id == u32::from(id))
                .and_then(|d| position_from_detection(id, d, region.row_offset))
                .unwrap_or_else(|| MarkerPosition::missing(id))
        })
        .collect();

    RegionReport {
        region_index: region.index,
        frame_index,
        markers,
    }
}

/// Region-local corners to a frame-absolute record. Returns `None` when the
/// vertical extent is outside the plausible band.
pub(crate) fn position_from_detection(
    id: MarkerId,
    det: &RawDetection,
    row_offset: u32,
) -> Option<MarkerPosition> {
    let xs = det.corners.iter().map(|c| c[0]);
    let ys = det.corners.iter().map(|c| c[1]);
    let min_x = xs.clone().fold(f32::MAX, f32::min);
    let max_x = xs.fold(f32::MIN, f32::max);
    let min_y = ys.clone().fold(f32::MAX, f32::min);
    let max_y = ys.fold(f32::MIN, f32::max);

    let height = max_y - min_y;
    if !(MIN_MARKER_HEIGHT..=MAX_MARKER_HEIGHT).contains(&height) {
        return None;
    }

    Some(MarkerPosition {
        id,
        x: (min_x + max_x) / 2.0,
        size: max_x - min_x,
        min_row: row_offset + min_y.max(0.0).round() as u32,
        max_row: row_offset + max_y.max(0.0).round() as u32,
        confidence: det.confidence,
        found: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::region::{RegionRect, RegionSpec};

    fn bottom_region() -> RegionSpec {
        RegionSpec {
            index: 1,
            rect: RegionRect {
                x: 0,
                y: 220,
                width: 640,
                height: 260,
            },
            row_offset: 220,
            owned_ids: vec![1, 2],
        }
    }

    fn detection(id: u32, x0: f32, y0: f32, w: f32, h: f32) -> RawDetection {
        RawDetection {
            id,
            corners: [[x0, y0], [x0 + w, y0], [x0 + w, y0 + h], [x0, y0 + h]],
            confidence: 0.9,
        }
    }

    #[test]
    fn corners_are_offset_to_frame_rows() {
        let pos = position_from_detection(1, &detection(1, 100.0, 30.0, 24.0, 24.0), 220).unwrap();
        assert_eq!(pos.x, 112.0);
        assert_eq!(pos.size, 24.0);
        assert_eq!(pos.min_row, 250);
        assert_eq!(pos.max_row, 274);
        assert!(pos.found);
    }

    #[test]
    fn implausible_heights_are_rejected() {
        assert!(position_from_detection(1, &detection(1, 0.0, 0.0, 5.0, 5.0), 0).is_none());
        assert!(position_from_detection(1, &detection(1, 0.0, 0.0, 250.0, 250.0), 0).is_none());
    }

    #[test]
    fn report_covers_every_owned_id() {
        let region = bottom_region();
        let raw = [detection(1, 100.0, 30.0, 24.0, 24.0)];
        let report = build_report(&region, 12, &raw);

        assert_eq!(report.frame_index, 12);
        assert_eq!(report.markers.len(), 2);
        assert!(report.markers[0].found);
        assert_eq!(report.markers[0].id, 1);
        // owned but unseen id is explicitly reported as lost
        assert!(!report.markers[1].found);
        assert_eq!(report.markers[1].id, 2);
    }

    #[test]
    fn unowned_detections_are_filtered_out() {
        let region = bottom_region();
        // id 3 belongs to the top region even if it strays into this view
        let raw = [detection(3, 50.0, 10.0, 20.0, 20.0)];
        let report = build_report(&region, 0, &raw);
        assert!(report.markers.iter().all(|m| !m.found));
        assert!(report.markers.iter().all(|m| m.id == 1 || m.id == 2));
    }

    #[test]
    fn empty_detection_round_reports_all_lost() {
        let report = build_report(&bottom_region(), 3, &[]);
        assert!(report.markers.iter().all(|m| !m.found));
    }
}
