//! Main loop: acquire, process, present, release, publish, poll input

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tracing::{debug, info, warn};

use crate::capture::{BufferRing, CaptureDevice};
use crate::display::{DisplaySurface, InputEvent, InputSource};
use crate::pipeline::{Direction, Frame, FramePipeline, FrameReport, PipelineState};
use crate::snapshot::{write_snapshot, FrameExchange, ImageEncoder, SnapshotTrigger};

/// When the loop stops
#[derive(Debug, Clone, Default)]
pub struct LoopControl {
    /// Checked at the top of every iteration
    pub exit: Arc<AtomicBool>,
    pub max_frames: Option<u64>,
}

impl LoopControl {
    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::SeqCst);
    }

    fn should_stop(&self, frames: u64) -> bool {
        self.exit.load(Ordering::SeqCst) || self.max_frames.is_some_and(|max| frames >= max)
    }
}

/// What a finished run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub snapshots_requested: u64,
    pub last_direction: Direction,
    pub average: Duration,
}

/// Run until an exit request, the frame limit, or an error.
///
/// Every processed frame is presented and then published to `exchange`; the
/// snapshot worker only ever reads published frames.
pub fn run_loop<D, S, I>(
    ring: &mut BufferRing<D>,
    pipeline: &FramePipeline,
    surface: &mut S,
    input: &mut I,
    exchange: &FrameExchange,
    trigger: &SnapshotTrigger,
    control: &LoopControl,
) -> Result<RunSummary>
where
    D: CaptureDevice,
    S: DisplaySurface,
    I: InputSource,
{
    let format = *ring.format();
    let mut state = PipelineState::new();
    let mut target = Frame::new(format.width, format.height);
    let mut summary = RunSummary::default();

    while !control.should_stop(summary.frames) {
        let lease = ring.acquire()?;
        let raw = lease.bytes();
        let report = pipeline.process_frame(raw, raw.len(), &mut target, &mut state);
        surface.present(&target)?;
        lease.release()?;

        target = exchange.publish(target);
        summary.frames += 1;
        summary.last_direction = report.direction;
        summary.average = report.average;

        for event in input.poll_events() {
            match event {
                InputEvent::Exit => {
                    info!("Exit requested");
                    control.request_exit();
                }
                InputEvent::CaptureRequested => {
                    summary.snapshots_requested += 1;
                    if !trigger.request() {
                        warn!("Snapshot worker is not running");
                    }
                }
            }
        }
    }

    let stats = ring.stats();
    debug!(
        "Ring stats: {} dequeued, {} enqueued, {} retries",
        stats.dequeued, stats.enqueued, stats.retries
    );
    Ok(summary)
}

/// Grab one frame, annotate it and hand it to `encoder`
pub fn capture_once<D: CaptureDevice>(
    ring: &mut BufferRing<D>,
    pipeline: &FramePipeline,
    encoder: &dyn ImageEncoder,
) -> Result<FrameReport> {
    let format = *ring.format();
    let mut target = Frame::new(format.width, format.height);
    let mut state = PipelineState::new();

    let lease = ring.acquire()?;
    let raw = lease.bytes();
    let report = pipeline.process_frame(raw, raw.len(), &mut target, &mut state);
    lease.release()?;

    write_snapshot(&target, encoder)?;
    info!("Captured frame: {}", report.direction);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::{gray_frame, put_marker};
    use crate::capture::{PixelFormat, RingSpec, SyntheticDevice};
    use crate::pipeline::{MarkerThresholds, RingStyle};
    use crate::snapshot::SnapshotError;
    use crate::PipelineConfig;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const W: u32 = 64;
    const H: u32 = 48;

    #[derive(Default)]
    struct Screen {
        presented: u64,
        last: Option<Frame>,
    }

    impl DisplaySurface for Screen {
        fn present(&mut self, frame: &Frame) -> Result<()> {
            self.presented += 1;
            self.last = Some(frame.clone());
            Ok(())
        }
    }

    /// Yields one scripted batch per poll, then nothing
    #[derive(Default)]
    struct Script(VecDeque<Vec<InputEvent>>);

    impl InputSource for Script {
        fn poll_events(&mut self) -> Vec<InputEvent> {
            self.0.pop_front().unwrap_or_default()
        }
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<Vec<u8>>>);

    impl ImageEncoder for Recording {
        fn encode(&self, pixels: &[u8], _: u32, _: u32, _: u8, _: usize) -> Result<(), SnapshotError> {
            self.0.lock().unwrap().push(pixels.to_vec());
            Ok(())
        }
    }

    fn ring_with(raw: Vec<u8>) -> BufferRing<SyntheticDevice> {
        let spec = RingSpec {
            width: W,
            height: H,
            format: PixelFormat::Yuyv4,
            buffer_count: 2,
            dequeue_retries: 3,
        };
        BufferRing::open(SyntheticDevice::replay(raw), &spec).unwrap()
    }

    fn pipeline() -> FramePipeline {
        let config = PipelineConfig {
            workers: 4,
            pin_workers: false,
        };
        let ring = RingStyle {
            radius: 10,
            thickness: 2,
            color: [0, 0, 255],
        };
        FramePipeline::new(&config, MarkerThresholds::default(), ring).unwrap()
    }

    #[test]
    fn stops_at_frame_limit() {
        let mut ring = ring_with(gray_frame(W, H));
        let mut screen = Screen::default();
        let mut input = Script::default();
        let exchange = FrameExchange::new(W, H);
        let (trigger, _rx) = SnapshotTrigger::channel();
        let control = LoopControl {
            max_frames: Some(5),
            ..Default::default()
        };

        let summary = run_loop(
            &mut ring,
            &pipeline(),
            &mut screen,
            &mut input,
            &exchange,
            &trigger,
            &control,
        )
        .unwrap();

        assert_eq!(summary.frames, 5);
        assert_eq!(screen.presented, 5);
        assert_eq!(summary.last_direction, Direction::NotDetected);
        // every buffer went back to the device
        assert_eq!(ring.stats().dequeued, 5);
        assert_eq!(ring.stats().enqueued, 2 + 5);
        assert_eq!(exchange.latest().pixel(0, 0).g, 130);
    }

    #[test]
    fn exit_event_ends_loop_and_captures_are_forwarded() {
        let mut raw = gray_frame(W, H);
        put_marker(&mut raw, W, 10, 10);
        let mut ring = ring_with(raw);
        let mut screen = Screen::default();
        let mut input = Script(VecDeque::from(vec![
            vec![InputEvent::CaptureRequested],
            vec![],
            vec![InputEvent::CaptureRequested, InputEvent::Exit],
        ]));
        let exchange = FrameExchange::new(W, H);
        let (trigger, rx) = SnapshotTrigger::channel();
        let control = LoopControl::default();

        let summary = run_loop(
            &mut ring,
            &pipeline(),
            &mut screen,
            &mut input,
            &exchange,
            &trigger,
            &control,
        )
        .unwrap();

        assert_eq!(summary.frames, 3);
        assert_eq!(summary.snapshots_requested, 2);
        assert_eq!(summary.last_direction, Direction::Left);
        // nobody drained the channel, so the two requests coalesced
        assert_eq!(rx.len(), 1);
        assert!(control.exit.load(Ordering::SeqCst));
    }

    #[test]
    fn preset_exit_flag_processes_nothing() {
        let mut ring = ring_with(gray_frame(W, H));
        let mut screen = Screen::default();
        let exchange = FrameExchange::new(W, H);
        let (trigger, _rx) = SnapshotTrigger::channel();
        let control = LoopControl::default();
        control.request_exit();

        let summary = run_loop(
            &mut ring,
            &pipeline(),
            &mut screen,
            &mut Script::default(),
            &exchange,
            &trigger,
            &control,
        )
        .unwrap();
        assert_eq!(summary, RunSummary::default());
        assert_eq!(screen.presented, 0);
    }

    #[test]
    fn failing_surface_still_returns_buffer() {
        struct Broken;
        impl DisplaySurface for Broken {
            fn present(&mut self, _: &Frame) -> Result<()> {
                Err(color_eyre::eyre::eyre!("window gone"))
            }
        }

        let mut ring = ring_with(gray_frame(W, H));
        let exchange = FrameExchange::new(W, H);
        let (trigger, _rx) = SnapshotTrigger::channel();
        let result = run_loop(
            &mut ring,
            &pipeline(),
            &mut Broken,
            &mut Script::default(),
            &exchange,
            &trigger,
            &LoopControl::default(),
        );

        assert!(result.is_err());
        assert_eq!(ring.stats().dequeued, 1);
        assert_eq!(ring.stats().enqueued, 2 + 1);
    }

    #[test]
    fn capture_once_writes_annotated_frame() {
        let mut raw = gray_frame(W, H);
        put_marker(&mut raw, W, 32, 40);
        let mut ring = ring_with(raw);
        let encoder = Recording::default();

        let report = capture_once(&mut ring, &pipeline(), &encoder).unwrap();

        assert_eq!(report.direction, Direction::Back);
        assert_eq!(report.detection.position(), Some((32, 40)));
        let images = encoder.0.lock().unwrap();
        // RGBA at (32 - 9, 40): distance 9 lies inside the ring
        let at = ((40 * W + 23) * 4) as usize;
        assert_eq!(&images[0][at..at + 4], &[0, 0, 255, 255]);
    }
}
