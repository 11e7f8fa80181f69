use image::DynamicImage;
use serde::Serialize;
use std::sync::Arc;

/// Stable identity of a tracked marker, 1..=4.
pub type MarkerId = u8;

/// Upper bound on simultaneously tracked markers.
pub const MAX_TRACKED_MARKERS: usize = 4;

/// Last-known detection state of one marker.
///
/// Records are mutated in place across frames: when a marker goes missing only
/// `found` and `confidence` are cleared, the geometry keeps its last-known
/// value. Consumers must therefore gate on `found`, never on the coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarkerPosition {
    pub id: MarkerId,
    /// Horizontal center, absolute frame pixels.
    pub x: f32,
    /// Apparent width, used downstream for distance estimation.
    pub size: f32,
    /// Vertical bounding extent, absolute frame rows.
    pub min_row: u32,
    pub max_row: u32,
    /// Backend-defined score in (0, 1]; zero when not found.
    pub confidence: f32,
    pub found: bool,
}

impl MarkerPosition {
    pub fn missing(id: MarkerId) -> Self {
        Self {
            id,
            x: 0.0,
            size: 0.0,
            min_row: 0,
            max_row: 0,
            confidence: 0.0,
            found: false,
        }
    }

    /// Clears the found flag but keeps the stale geometry.
    pub fn mark_lost(&mut self) {
        self.found = false;
        self.confidence = 0.0;
    }
}

/// The merged per-frame detection result for all tracked markers.
///
/// Owned by the coordinator; region workers never touch it directly. Each
/// worker reports records for the ids it owns and the coordinator alone
/// writes them into the slots, so a slot has exactly one writer.
#[derive(Debug)]
pub struct PositionTable {
    markers: Vec<MarkerPosition>,
    pub frame_index: u64,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl PositionTable {
    pub fn new(tracked_ids: &[MarkerId], frame_width: u32, frame_height: u32) -> Self {
        Self {
            markers: tracked_ids
                .iter()
                .map(|&id| MarkerPosition::missing(id))
                .collect(),
            frame_index: 0,
            frame_width,
            frame_height,
        }
    }

    pub fn markers(&self) -> &[MarkerPosition] {
        &self.markers
    }

    pub fn get(&self, id: MarkerId) -> Option<&MarkerPosition> {
        self.markers.iter().find(|m| m.id == id)
    }

    /// Writes a region's report into the slots it owns.
    ///
    /// Records for ids outside `owned_ids` are discarded: the id partition is
    /// static and a region must never publish another region's markers.
    pub fn merge_report(&mut self, owned_ids: &[MarkerId], report: &RegionReport) {
        for rec in &report.markers {
            if !owned_ids.contains(&rec.id) {
                tracing::warn!(
                    "region {} reported unowned marker {}, dropping",
                    report.region_index,
                    rec.id
                );
                continue;
            }
            let Some(slot) = self.markers.iter_mut().find(|m| m.id == rec.id) else {
                continue;
            };
            debug_assert_eq!(slot.id, rec.id);
            if rec.found {
                *slot = *rec;
            } else {
                slot.mark_lost();
            }
        }
    }

    /// Degrades every given id to not-found, keeping stale geometry.
    pub fn mark_lost(&mut self, ids: &[MarkerId]) {
        for slot in self.markers.iter_mut().filter(|m| ids.contains(&m.id)) {
            slot.mark_lost();
        }
    }
}

/// A decoded input frame shared immutably with the region workers.
pub struct Frame {
    pub index: u64,
    pub image: DynamicImage,
}

/// One unit of detection work: the frame a region worker should process next.
pub struct RegionJob {
    pub frame: Arc<Frame>,
}

/// A region worker's completed round: one record per owned id, `found`
/// cleared for ids not seen this frame.
pub struct RegionReport {
    pub region_index: usize,
    pub frame_index: u64,
    pub markers: Vec<MarkerPosition>,
}

/// Smoothed per-frame timing, same exponential moving average the progress
/// output reports.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub frames: u64,
    ms_per_frame: f64,
}

impl PipelineStats {
    pub fn update(&mut self, ms: f64) {
        self.frames += 1;
        if self.ms_per_frame == 0.0 {
            self.ms_per_frame = ms;
        } else {
            self.ms_per_frame = self.ms_per_frame * 0.9 + ms * 0.1;
        }
    }

    pub fn fps(&self) -> f64 {
        if self.ms_per_frame > 0.0 {
            1000.0 / self.ms_per_frame
        } else {
            0.0
        }
    }
}
