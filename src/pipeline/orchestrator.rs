//! Per-frame processing: parallel conversion, detection, classification, overlay

use std::time::{Duration, Instant};

use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use tracing::{debug, info, instrument, warn};

use super::convert::convert_into;
use super::detect::{find_marker, Detection, MarkerThresholds};
use super::direction::{classify, Direction, DirectionTracker};
use super::frame::Frame;
use super::overlay::{draw_ring, RingStyle};
use super::segment::{partition, Segment};
use super::timer::RunningTimer;
use crate::PipelineConfig;

/// State carried from one frame to the next by the caller
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    pub tracker: DirectionTracker,
    pub timer: RunningTimer,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Outcome of one `process_frame` call
#[derive(Debug, Clone, Copy)]
pub struct FrameReport {
    pub detection: Detection,
    pub direction: Direction,
    /// Direction differs from the previously reported one
    pub changed: bool,
    pub elapsed: Duration,
    /// Cumulative average over every processed frame
    pub average: Duration,
}

/// Converts raw YUYV frames in parallel and annotates the result
pub struct FramePipeline {
    pool: ThreadPool,
    workers: usize,
    thresholds: MarkerThresholds,
    ring: RingStyle,
}

impl FramePipeline {
    pub fn new(
        config: &PipelineConfig,
        thresholds: MarkerThresholds,
        ring: RingStyle,
    ) -> Result<Self, ThreadPoolBuildError> {
        let workers = config.workers.max(1);
        let cores = if config.pin_workers {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };
        if config.pin_workers && cores.is_empty() {
            warn!("CPU pinning requested but no core ids are available");
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("convert-{i}"))
            .start_handler(move |i| {
                if let Some(core) = cores.get(i % cores.len().max(1)) {
                    if !core_affinity::set_for_current(*core) {
                        warn!("Failed to pin conversion worker {} to {:?}", i, core);
                    }
                }
            })
            .build()?;

        info!("Frame pipeline ready with {} conversion workers", workers);

        Ok(Self {
            pool,
            workers,
            thresholds,
            ring,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn thresholds(&self) -> &MarkerThresholds {
        &self.thresholds
    }

    pub fn ring_style(&self) -> &RingStyle {
        &self.ring
    }

    /// Convert `raw[..byte_count]` into `target`, find the marker, classify
    /// it and draw the ring.
    ///
    /// Bytes beyond what `target` can hold, and a trailing partial
    /// macropixel, are ignored. A short buffer leaves the rest of `target`
    /// as it was.
    #[instrument(level = "trace", skip_all, fields(bytes = byte_count))]
    pub fn process_frame(
        &self,
        raw: &[u8],
        byte_count: usize,
        target: &mut Frame,
        state: &mut PipelineState,
    ) -> FrameReport {
        let started = Instant::now();

        let byte_count = byte_count.min(raw.len()).min(target.pixel_count() * 2);
        let segments = partition(byte_count, self.workers);
        self.convert(raw, &segments, target.as_bytes_mut());

        let detection = find_marker(target, &self.thresholds);
        let direction = classify(&detection, target.width(), target.height());
        let changed = state.tracker.update(direction);

        if let Detection::Found(marker) = detection {
            draw_ring(target, marker.x, marker.y, &self.ring);
        }

        let elapsed = started.elapsed();
        let average = state.timer.record(elapsed);

        metrics::histogram!("frame_process_time_us").record(elapsed.as_micros() as f64);
        metrics::counter!("frames_processed_total").increment(1);
        if changed {
            metrics::counter!("direction_changes_total").increment(1);
            info!("Direction changed to {}", direction);
        }
        debug!(
            "Thread time avg: {:.2} ms and direction {}",
            state.timer.average_ms(),
            direction
        );

        FrameReport {
            detection,
            direction,
            changed,
            elapsed,
            average,
        }
    }

    /// Run the converter over every segment on the worker pool; returns once
    /// all segments are written.
    fn convert(&self, raw: &[u8], segments: &[Segment], dst: &mut [u8]) {
        let mut jobs = Vec::with_capacity(segments.len());
        let mut rest = dst;
        let mut consumed = 0;

        for segment in segments.iter().filter(|s| !s.is_empty()) {
            let range = segment.dest_bytes();
            let (_, tail) = std::mem::take(&mut rest).split_at_mut(range.start - consumed);
            let (out, tail) = tail.split_at_mut(range.len());
            rest = tail;
            consumed = range.end;
            jobs.push((&raw[segment.start..segment.end], out));
        }

        self.pool.scope(move |scope| {
            for (src, out) in jobs {
                scope.spawn(move |_| {
                    convert_into(src, out);
                });
            }
        });
    }
}
