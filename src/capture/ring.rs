//! Buffer ring: ownership handshake over a fixed pool of mapped capture buffers

use tracing::{debug, error, info, instrument, warn};

use super::device::{CaptureDevice, CaptureError};
use super::frame::{Dequeued, NegotiatedFormat, PixelFormat};

/// Who may touch a capture buffer right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Unmapped,
    /// Queued; the device may write into it
    DeviceOwned,
    /// Dequeued (or not yet queued); the application may read it
    ApplicationOwned,
}

/// What to ask the device for
#[derive(Debug, Clone, Copy)]
pub struct RingSpec {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
    /// Extra attempts for an interrupted dequeue
    pub dequeue_retries: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    pub dequeued: u64,
    pub enqueued: u64,
    pub retries: u64,
}

/// Owns the device and the state of every buffer in its pool.
///
/// Dropping the ring stops streaming and releases every mapping, whichever
/// path the caller leaves by.
pub struct BufferRing<D: CaptureDevice> {
    device: D,
    format: NegotiatedFormat,
    states: Vec<BufferState>,
    lengths: Vec<usize>,
    streaming: bool,
    retries: u32,
    stats: RingStats,
}

impl<D: CaptureDevice> BufferRing<D> {
    /// Negotiate, request, map and queue the pool, then start streaming
    #[instrument(skip(device))]
    pub fn open(mut device: D, spec: &RingSpec) -> Result<Self, CaptureError> {
        let format = device.negotiate(spec.width, spec.height, spec.format)?;
        info!(
            "Negotiated {}x{} {:?} ({} bytes per line)",
            format.width, format.height, format.format, format.stride
        );

        let granted = device.request_buffers(spec.buffer_count)?;
        if granted == 0 {
            return Err(CaptureError::InsufficientBuffers {
                granted,
                required: 1,
            });
        }
        if granted != spec.buffer_count {
            warn!(
                "Requested {} capture buffers, device granted {}",
                spec.buffer_count, granted
            );
        }

        // From here on Drop undoes whatever part of the setup succeeded
        let mut ring = Self {
            device,
            format,
            states: vec![BufferState::Unmapped; granted as usize],
            lengths: Vec::with_capacity(granted as usize),
            streaming: false,
            retries: spec.dequeue_retries,
            stats: RingStats::default(),
        };

        for index in 0..ring.states.len() {
            let len = ring.device.map_buffer(index)?;
            ring.lengths.push(len);
            ring.states[index] = BufferState::ApplicationOwned;
            debug!("Mapped buffer {} ({} bytes)", index, len);
        }
        for index in 0..ring.states.len() {
            ring.enqueue(index)?;
        }

        ring.device.stream_on()?;
        ring.streaming = true;
        info!("Capture stream started with {} buffers", granted);

        Ok(ring)
    }

    pub fn format(&self) -> &NegotiatedFormat {
        &self.format
    }

    pub fn buffer_count(&self) -> usize {
        self.states.len()
    }

    pub fn states(&self) -> &[BufferState] {
        &self.states
    }

    pub fn stats(&self) -> RingStats {
        self.stats
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Block until the device fills a buffer and take ownership of it.
    ///
    /// The buffer goes back to the device when the lease is released or
    /// dropped.
    pub fn acquire(&mut self) -> Result<Lease<'_, D>, CaptureError> {
        if !self.streaming {
            return Err(CaptureError::NotStreaming);
        }

        let dequeued = self.dequeue_with_retry()?;
        let index = dequeued.index;
        match self.states.get(index) {
            None => {
                return Err(CaptureError::UnknownBuffer {
                    index,
                    count: self.states.len(),
                })
            }
            Some(BufferState::DeviceOwned) => {}
            Some(&actual) => {
                return Err(CaptureError::Ownership {
                    index,
                    actual,
                    expected: BufferState::DeviceOwned,
                })
            }
        }

        self.states[index] = BufferState::ApplicationOwned;
        self.stats.dequeued += 1;

        Ok(Lease {
            ring: self,
            dequeued,
            released: false,
        })
    }

    fn dequeue_with_retry(&mut self) -> Result<Dequeued, CaptureError> {
        let mut attempt = 0;
        loop {
            match self.device.dequeue() {
                Ok(dequeued) => return Ok(dequeued),
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    self.stats.retries += 1;
                    metrics::counter!("capture_retries_total").increment(1);
                    warn!("Dequeue interrupted ({}), retry {}/{}", e, attempt, self.retries);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn enqueue(&mut self, index: usize) -> Result<(), CaptureError> {
        let actual = *self
            .states
            .get(index)
            .ok_or(CaptureError::UnknownBuffer {
                index,
                count: self.states.len(),
            })?;
        if actual != BufferState::ApplicationOwned {
            return Err(CaptureError::Ownership {
                index,
                actual,
                expected: BufferState::ApplicationOwned,
            });
        }

        self.device.enqueue(index)?;
        self.states[index] = BufferState::DeviceOwned;
        self.stats.enqueued += 1;
        Ok(())
    }

    /// Stop streaming and release the pool
    pub fn shutdown(mut self) -> Result<(), CaptureError> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<(), CaptureError> {
        if self.streaming {
            self.device.stream_off()?;
            self.streaming = false;
            // stream off returns every queued buffer to the application
            for state in &mut self.states {
                if *state == BufferState::DeviceOwned {
                    *state = BufferState::ApplicationOwned;
                }
            }
        }

        if self.states.iter().any(|s| *s != BufferState::Unmapped) {
            self.device.release_buffers()?;
            self.states.fill(BufferState::Unmapped);
            self.lengths.clear();
            info!("Capture buffers released");
        }
        Ok(())
    }
}

impl<D: CaptureDevice> Drop for BufferRing<D> {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            error!("Capture teardown failed: {}", e);
        }
    }
}

/// Exclusive access to one dequeued buffer
pub struct Lease<'r, D: CaptureDevice> {
    ring: &'r mut BufferRing<D>,
    dequeued: Dequeued,
    released: bool,
}

impl<'r, D: CaptureDevice> Lease<'r, D> {
    pub fn index(&self) -> usize {
        self.dequeued.index
    }

    pub fn bytes_used(&self) -> usize {
        self.dequeued.bytes_used
    }

    pub fn sequence(&self) -> u32 {
        self.dequeued.sequence
    }

    pub fn dequeued(&self) -> &Dequeued {
        &self.dequeued
    }

    /// The valid part of the buffer
    pub fn bytes(&self) -> &[u8] {
        let buf = self.ring.device.buffer(self.dequeued.index).unwrap_or(&[]);
        &buf[..self.dequeued.bytes_used.min(buf.len())]
    }

    /// Hand the buffer back to the device
    pub fn release(mut self) -> Result<(), CaptureError> {
        self.released = true;
        self.ring.enqueue(self.dequeued.index)
    }
}

impl<'r, D: CaptureDevice> Drop for Lease<'r, D> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.ring.enqueue(self.dequeued.index) {
            error!("Failed to return buffer {}: {}", self.dequeued.index, e);
        }
    }
}
