use crate::pipeline::detector::RegionDetector;
use crate::pipeline::region::RegionSpec;
use crate::pipeline::types::{Frame, MarkerId, PositionTable, RegionJob, RegionReport};
use crate::pipeline::worker::region_worker;
use anyhow::{bail, Context, Result};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct WorkerLink {
    region: RegionSpec,
    jobs: Sender<RegionJob>,
    reports: Receiver<RegionReport>,
    /// Set when the worker blew the round deadline; it gets no new job until
    /// its late report has been drained.
    lagging: bool,
}

/// Owns the persistent worker pool and the position table.
///
/// One worker per region, spawned once and kept for the process lifetime.
/// Each worker has a bounded(1) job channel and a bounded(1) report channel;
/// the channel pair carries the happens-before edge between a worker's
/// detection writes and the coordinator's merge, replacing any shared-memory
/// signaling.
pub struct DetectionCoordinator {
    links: Vec<WorkerLink>,
    table: PositionTable,
    round_timeout: Duration,
}

impl DetectionCoordinator {
    /// Spawns one worker per region. `detectors` must supply one backend per
    /// region; workers own their backend exclusively.
    pub fn spawn(
        regions: Vec<RegionSpec>,
        detectors: Vec<Box<dyn RegionDetector>>,
        tracked_ids: &[MarkerId],
        frame_width: u32,
        frame_height: u32,
        round_timeout: Duration,
    ) -> Result<Self> {
        assert_eq!(regions.len(), detectors.len());

        let mut links = Vec::with_capacity(regions.len());
        for (region, detector) in regions.into_iter().zip(detectors) {
            let (job_tx, job_rx) = bounded::<RegionJob>(1);
            let (report_tx, report_rx) = bounded::<RegionReport>(1);

            let worker_region = region.clone();
            thread::Builder::new()
                .name(format!("region-{}", region.index))
                .spawn(move || region_worker(worker_region, detector, job_rx, report_tx))
                .with_context(|| format!("spawning worker for region {}", region.index))?;

            links.push(WorkerLink {
                region,
                jobs: job_tx,
                reports: report_rx,
                lagging: false,
            });
        }

        Ok(Self {
            links,
            table: PositionTable::new(tracked_ids, frame_width, frame_height),
            round_timeout,
        })
    }

    /// Runs one detection round: dispatches the frame to every region worker,
    /// waits for all completions, merges the reports into the table.
    ///
    /// Does not return until every dispatched region has either reported or
    /// blown the deadline, so a caller reading the table afterwards never
    /// observes a half-merged round. A worker that misses the deadline has
    /// its owned ids degraded to not-found and is skipped on following
    /// rounds until it catches up; a worker never has more than one job in
    /// flight.
    pub fn run_detection_round(&mut self, frame: &Arc<Frame>) -> Result<()> {
        self.table.frame_index = frame.index;

        let mut dispatched = vec![false; self.links.len()];
        for (i, link) in self.links.iter_mut().enumerate() {
            if link.lagging {
                match link.reports.try_recv() {
                    Ok(stale) => {
                        tracing::debug!(
                            "region {} caught up, discarding stale report for frame {}",
                            link.region.index,
                            stale.frame_index
                        );
                        link.lagging = false;
                    }
                    Err(TryRecvError::Empty) => {
                        tracing::warn!(
                            "region {} still busy, skipping it for frame {}",
                            link.region.index,
                            frame.index
                        );
                        self.table.mark_lost(&link.region.owned_ids);
                        continue;
                    }
                    Err(TryRecvError::Disconnected) => {
                        bail!("region worker {} terminated", link.region.index)
                    }
                }
            }

            if link.jobs.send(RegionJob { frame: Arc::clone(frame) }).is_err() {
                bail!("region worker {} terminated", link.region.index);
            }
            dispatched[i] = true;
        }

        for (i, link) in self.links.iter_mut().enumerate() {
            if !dispatched[i] {
                continue;
            }
            match link.reports.recv_timeout(self.round_timeout) {
                Ok(report) => self.table.merge_report(&link.region.owned_ids, &report),
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(
                        "region {} missed the {}ms round deadline on frame {}",
                        link.region.index,
                        self.round_timeout.as_millis(),
                        frame.index
                    );
                    link.lagging = true;
                    self.table.mark_lost(&link.region.owned_ids);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    bail!("region worker {} terminated", link.region.index)
                }
            }
        }

        Ok(())
    }

    /// The merged state of the last completed round.
    pub fn table(&self) -> &PositionTable {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::detector::RawDetection;
    use crate::pipeline::region::partition_frame;
    use image::DynamicImage;

    /// Test backend reporting a fixed marker after a per-call delay; once
    /// `slow_once` is consumed it answers at `delay`.
    struct StubDetector {
        id: u32,
        delay: Duration,
        slow_once: Option<Duration>,
    }

    impl StubDetector {
        fn new(id: u32, delay: Duration) -> Self {
            Self {
                id,
                delay,
                slow_once: None,
            }
        }
    }

    impl RegionDetector for StubDetector {
        fn detect(&mut self, _view: &DynamicImage) -> Result<Vec<RawDetection>> {
            thread::sleep(self.slow_once.take().unwrap_or(self.delay));
            Ok(vec![RawDetection {
                id: self.id,
                corners: [
                    [100.0, 30.0],
                    [130.0, 30.0],
                    [130.0, 60.0],
                    [100.0, 60.0],
                ],
                confidence: 0.9,
            }])
        }
    }

    fn frame(index: u64) -> Arc<Frame> {
        Arc::new(Frame {
            index,
            image: DynamicImage::new_rgb8(640, 480),
        })
    }

    fn spawn_with(
        top: StubDetector,
        bottom: StubDetector,
        timeout: Duration,
    ) -> DetectionCoordinator {
        let tracked = [1, 2, 3, 4];
        let regions = partition_frame(640, 480, &tracked);
        // region 0 owns {3, 4}, region 1 owns {1, 2}
        let detectors: Vec<Box<dyn RegionDetector>> = vec![Box::new(top), Box::new(bottom)];
        DetectionCoordinator::spawn(regions, detectors, &tracked, 640, 480, timeout).unwrap()
    }

    #[test]
    fn round_waits_for_the_slowest_region() {
        // region A is 10x slower than region B; the round must still expose
        // A's writes by the time it returns
        let mut coord = spawn_with(
            StubDetector::new(3, Duration::from_millis(50)),
            StubDetector::new(1, Duration::from_millis(5)),
            Duration::from_secs(5),
        );
        coord.run_detection_round(&frame(0)).unwrap();

        let table = coord.table();
        assert!(table.get(3).unwrap().found, "slow region merged");
        assert!(table.get(1).unwrap().found, "fast region merged");
        assert_eq!(table.frame_index, 0);
    }

    #[test]
    fn consecutive_rounds_keep_single_job_in_flight() {
        let mut coord = spawn_with(
            StubDetector::new(3, Duration::from_millis(1)),
            StubDetector::new(1, Duration::from_millis(1)),
            Duration::from_secs(5),
        );
        for i in 0..5 {
            coord.run_detection_round(&frame(i)).unwrap();
            assert_eq!(coord.table().frame_index, i);
            assert!(coord.table().get(3).unwrap().found);
        }
    }

    #[test]
    fn deadline_expiry_degrades_to_not_found() {
        let mut top = StubDetector::new(3, Duration::from_millis(1));
        top.slow_once = Some(Duration::from_millis(300));
        let mut coord = spawn_with(
            top,
            StubDetector::new(1, Duration::from_millis(1)),
            Duration::from_millis(40),
        );
        coord.run_detection_round(&frame(0)).unwrap();

        // slow region timed out: its ids read lost, the fast region merged
        assert!(!coord.table().get(3).unwrap().found);
        assert!(!coord.table().get(4).unwrap().found);
        assert!(coord.table().get(1).unwrap().found);

        // the lagging worker is not re-dispatched while still busy
        coord.run_detection_round(&frame(1)).unwrap();
        assert!(!coord.table().get(3).unwrap().found);

        // once the late report drains, the worker rejoins the rotation
        thread::sleep(Duration::from_millis(400));
        coord.run_detection_round(&frame(2)).unwrap();
        assert!(coord.table().get(3).unwrap().found);
        assert_eq!(coord.table().frame_index, 2);
    }
}
