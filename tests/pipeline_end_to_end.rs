use std::sync::Arc;

use laserdot::capture::synthetic::{gray_frame, put_marker};
use laserdot::capture::{BufferRing, BufferState, SyntheticDevice};
use laserdot::pipeline::{Detection, Direction, Frame, FramePipeline, PipelineState, Pixel};
use laserdot::snapshot::{spawn_snapshot_worker, FrameExchange, PngEncoder, SnapshotTrigger};
use laserdot::Config;

const MARKER: (u32, u32) = (400, 440);

fn marker_scene(config: &Config) -> Vec<u8> {
    let mut raw = gray_frame(config.capture.width, config.capture.height);
    put_marker(&mut raw, config.capture.width, MARKER.0, MARKER.1);
    raw
}

fn distance_sq(x: u32, y: u32) -> i64 {
    let dx = x as i64 - MARKER.0 as i64;
    let dy = y as i64 - MARKER.1 as i64;
    dx * dx + dy * dy
}

#[test]
fn marker_frame_is_ringed_and_classified_back() {
    let config = Config::default();
    let raw = marker_scene(&config);
    let mut ring = BufferRing::open(SyntheticDevice::replay(raw), &config.ring_spec()).unwrap();
    let pipeline = FramePipeline::new(&config.pipeline, config.detector, config.overlay).unwrap();

    let mut target = Frame::new(config.capture.width, config.capture.height);
    let mut state = PipelineState::new();

    let lease = ring.acquire().unwrap();
    let bytes = lease.bytes();
    let report = pipeline.process_frame(bytes, bytes.len(), &mut target, &mut state);
    lease.release().unwrap();

    assert!(matches!(report.detection, Detection::Found(_)));
    assert_eq!(report.detection.position(), Some(MARKER));
    assert_eq!(report.direction, Direction::Back);
    assert!(report.changed);

    let blue = Pixel::opaque(0, 0, 255);
    let (r, t) = (config.overlay.radius as i64, config.overlay.thickness as i64);
    let inner = (r - t) * (r - t);
    let outer = r * r;
    for y in MARKER.1 - 55..target.height() {
        for x in MARKER.0 - 55..=MARKER.0 + 55 {
            let d = distance_sq(x, y);
            let px = target.pixel(x, y);
            if d > inner && d < outer {
                assert_eq!(px, blue, "ring pixel ({x}, {y})");
            } else if (x, y) != MARKER {
                assert_ne!(px, blue, "pixel ({x}, {y}) outside the ring");
            }
        }
    }
    // the marker itself stays red
    assert_eq!(target.pixel(MARKER.0, MARKER.1).r, 255);

    assert!(ring.states().iter().all(|s| *s == BufferState::DeviceOwned));
    ring.shutdown().unwrap();
}

#[test]
fn every_buffer_cycles_once_per_round() {
    let config = Config::default();
    let mut ring = BufferRing::open(SyntheticDevice::moving_dot(), &config.ring_spec()).unwrap();
    let count = ring.buffer_count();

    for _ in 0..3 {
        let mut seen = Vec::new();
        for _ in 0..count {
            let lease = ring.acquire().unwrap();
            seen.push(lease.index());
            lease.release().unwrap();
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..count).collect::<Vec<_>>());
    }
    assert_eq!(ring.stats().dequeued, 3 * count as u64);
}

#[test]
fn moving_dot_changes_direction() {
    let config = Config::default();
    let mut ring = BufferRing::open(SyntheticDevice::moving_dot(), &config.ring_spec()).unwrap();
    let pipeline = FramePipeline::new(&config.pipeline, config.detector, config.overlay).unwrap();
    let mut target = Frame::new(config.capture.width, config.capture.height);
    let mut state = PipelineState::new();

    for _ in 0..120 {
        let lease = ring.acquire().unwrap();
        let bytes = lease.bytes();
        let report = pipeline.process_frame(bytes, bytes.len(), &mut target, &mut state);
        lease.release().unwrap();
        assert_ne!(report.direction, Direction::NotDetected);
    }
    assert!(state.tracker.changes() > 1);
    assert_eq!(state.timer.loops(), 120);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshot_of_published_frame() {
    let config = Config::default();
    let raw = marker_scene(&config);
    let mut ring = BufferRing::open(SyntheticDevice::replay(raw), &config.ring_spec()).unwrap();
    let pipeline = FramePipeline::new(&config.pipeline, config.detector, config.overlay).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.png");
    let exchange = Arc::new(FrameExchange::new(config.capture.width, config.capture.height));
    let (trigger, requests) = SnapshotTrigger::channel();
    let worker = spawn_snapshot_worker(
        Arc::clone(&exchange),
        requests,
        Arc::new(PngEncoder::new(&path)),
    );

    let mut target = Frame::new(config.capture.width, config.capture.height);
    let mut state = PipelineState::new();
    {
        let lease = ring.acquire().unwrap();
        let bytes = lease.bytes();
        pipeline.process_frame(bytes, bytes.len(), &mut target, &mut state);
        lease.release().unwrap();
    }
    let _spare = exchange.publish(target);

    assert!(trigger.request());
    drop(trigger);
    assert_eq!(worker.await.unwrap(), 1);

    let img = image::open(&path).unwrap().into_rgba8();
    assert_eq!(img.dimensions(), (640, 480));
    // channels are in RGBA order in the file
    assert_eq!(img.get_pixel(MARKER.0 - 47, MARKER.1).0, [0, 0, 255, 255]);
    assert_eq!(img.get_pixel(MARKER.0, MARKER.1).0[0], 255);
    assert_eq!(img.get_pixel(10, 10).0, [130, 130, 130, 255]);
}
