mod capture;
mod frame;

pub use capture::{CaptureConfig, CaptureStatus, FrameSource, VideoBackend, VideoStream};
pub use frame::Frame;
