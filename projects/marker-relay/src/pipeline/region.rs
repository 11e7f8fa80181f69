use crate::pipeline::types::MarkerId;

/// Rows added on each side of the frame midline so a marker straddling the
/// boundary is fully visible to at least one region.
pub const OVERLAP_ROWS: u32 = 20;

/// An axis-aligned sub-rectangle of the frame, pixel units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One region of the static partition: its rectangle, the row offset that
/// converts region-local rows back to frame rows, and the marker ids only
/// this region may report.
#[derive(Debug, Clone)]
pub struct RegionSpec {
    pub index: usize,
    pub rect: RegionRect,
    pub row_offset: u32,
    pub owned_ids: Vec<MarkerId>,
}

/// Splits a frame into the fixed two-region partition, computed once at
/// startup.
///
/// The top half carries the far-side markers {3, 4}, the bottom half the
/// near-side markers {1, 2}; both halves extend [`OVERLAP_ROWS`] past the
/// midline. Ownership is intersected with the tracked set so untracked ids
/// are never reported.
pub fn partition_frame(
    frame_width: u32,
    frame_height: u32,
    tracked_ids: &[MarkerId],
) -> Vec<RegionSpec> {
    let half = frame_height / 2;
    let overlap = OVERLAP_ROWS.min(half);

    let owned = |ids: [MarkerId; 2]| -> Vec<MarkerId> {
        ids.into_iter()
            .filter(|id| tracked_ids.contains(id))
            .collect()
    };

    let top = RegionRect {
        x: 0,
        y: 0,
        width: frame_width,
        height: (half + overlap).min(frame_height),
    };
    let bottom_start = half - overlap;
    let bottom = RegionRect {
        x: 0,
        y: bottom_start,
        width: frame_width,
        height: frame_height - bottom_start,
    };

    vec![
        RegionSpec {
            index: 0,
            rect: top,
            row_offset: top.y,
            owned_ids: owned([3, 4]),
        },
        RegionSpec {
            index: 1,
            rect: bottom,
            row_offset: bottom.y,
            owned_ids: owned([1, 2]),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_covers_every_row_with_overlap() {
        let regions = partition_frame(640, 480, &[1, 2, 3, 4]);
        assert_eq!(regions.len(), 2);

        let top = &regions[0];
        let bottom = &regions[1];
        assert_eq!(top.rect.y, 0);
        assert_eq!(top.rect.height, 240 + OVERLAP_ROWS);
        assert_eq!(bottom.rect.y, 240 - OVERLAP_ROWS);
        assert_eq!(bottom.rect.y + bottom.rect.height, 480);

        // the two regions overlap by exactly twice the band width
        let overlap = (top.rect.y + top.rect.height) - bottom.rect.y;
        assert_eq!(overlap, 2 * OVERLAP_ROWS);
    }

    #[test]
    fn ownership_is_a_disjoint_partition_of_tracked_ids() {
        let tracked = [1, 2, 3, 4];
        let regions = partition_frame(640, 480, &tracked);
        let mut all: Vec<MarkerId> = regions
            .iter()
            .flat_map(|r| r.owned_ids.iter().copied())
            .collect();
        all.sort_unstable();
        assert_eq!(all, tracked);
    }

    #[test]
    fn untracked_ids_are_owned_by_nobody() {
        let regions = partition_frame(640, 480, &[1, 3]);
        assert_eq!(regions[0].owned_ids, vec![3]);
        assert_eq!(regions[1].owned_ids, vec![1]);
    }

    #[test]
    fn row_offset_matches_region_origin() {
        for region in partition_frame(800, 600, &[1, 2, 3, 4]) {
            assert_eq!(region.row_offset, region.rect.y);
        }
    }

    #[test]
    fn degenerate_small_frame_still_partitions() {
        let regions = partition_frame(32, 16, &[1, 2, 3, 4]);
        assert_eq!(regions.len(), 2);
        for region in &regions {
            assert!(region.rect.y + region.rect.height <= 16);
        }
    }
}
