//!Media components for the styler client: live-source acquisition, frame
//!encoding and the result display surface.

///Live media sources (camera and video file capture pipelines)
pub mod capture;

///JPEG frame encoding
pub mod encode;

///Synthetic frames for tests and demos
pub mod pattern;

///Inbound frame display
pub mod render;

pub use capture::FfmpegAcquirer;
pub use encode::JpegFrameEncoder;
pub use pattern::PatternSource;
pub use render::Renderer;
