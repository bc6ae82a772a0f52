pub mod convert;
pub mod detect;
pub mod direction;
pub mod frame;
pub mod orchestrator;
pub mod overlay;
pub mod segment;
pub mod timer;

pub use detect::{Detection, Marker, MarkerThresholds};
pub use direction::{Direction, DirectionTracker};
pub use frame::{Frame, Pixel};
pub use orchestrator::{FramePipeline, FrameReport, PipelineState};
pub use overlay::RingStyle;
pub use timer::RunningTimer;
