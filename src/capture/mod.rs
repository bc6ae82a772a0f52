pub mod device;
pub mod frame;
pub mod ring;
pub mod synthetic;
pub mod v4l2;

pub use device::{CaptureDevice, CaptureError};
pub use frame::{Dequeued, NegotiatedFormat, PixelFormat};
pub use ring::{BufferRing, BufferState, Lease, RingSpec, RingStats};
pub use synthetic::SyntheticDevice;
pub use v4l2::V4l2Device;
