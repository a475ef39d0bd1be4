//!Core types and component seams for the styler client. All other styler
//!crates depend on this one. This includes the frame data types, the
//!capability traits each component is wired through, and the session state
//!machine that owns them.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use error::{AcquisitionError, ChannelError, EncodeError, UpstreamError};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};

pub mod error;
pub mod pump;
pub mod session;

///One uncompressed RGB24 frame read from a media source.
#[derive(Clone, PartialEq)]
pub struct RawFrame {
    pub width: u16,
    pub height: u16,
    pub pixels: Vec<u8>,
}

impl RawFrame {
    ///A frame is only usable once it has real dimensions.
    pub fn has_dimensions(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawFrame({}x{}, {} bytes)", self.width, self.height, self.pixels.len())
    }
}

///One compressed still-image payload, outbound (captured) or inbound
///(processed). Transient: created per frame and consumed immediately.
#[derive(Clone, PartialEq)]
pub struct FrameBuffer {
    pub bytes: Vec<u8>,
}

impl FrameBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameBuffer({} bytes)", self.bytes.len())
    }
}

///The frame currently on the render target: the bytes that were displayed
///plus the dimensions recovered while decode-verifying them.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayFrame {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

///Streaming channel lifecycle. `Open` is the only state in which frames move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

///Lifecycle notifications a channel delivers to its owning session.
#[derive(Clone, Debug)]
pub enum ChannelEvent {
    Opened,
    Closed,
    Error(ChannelError),
}

///Readable-frame capability. The frame pump depends on this and nothing
///else about the source.
pub trait FrameSource: Send + Sync {
    ///The most recent decoded frame, or `None` if the source has not
    ///produced one yet.
    fn current_frame(&self) -> Option<RawFrame>;

    ///True once at least one frame with non-zero dimensions is available.
    fn ready(&self) -> bool;
}

///A live video-producing handle (camera or playing video file). Owned by
///exactly one session; `release` must stop the underlying capture and be
///safe to call more than once.
pub trait MediaSource: Send + Sync {
    ///A cheap readable-frame handle onto this source.
    fn reader(&self) -> Box<dyn FrameSource>;

    ///Stop the underlying capture. Idempotent.
    fn release(&self);
}

///`FrameSource` backed by a watch channel of decoded frames. Capture
///pipelines publish into the watch sender; readers clone the receiver.
pub struct WatchFrameSource {
    rx: watch::Receiver<Option<RawFrame>>,
}

impl WatchFrameSource {
    pub fn new(rx: watch::Receiver<Option<RawFrame>>) -> Self {
        Self { rx }
    }
}

impl FrameSource for WatchFrameSource {
    fn current_frame(&self) -> Option<RawFrame> {
        self.rx.borrow().clone()
    }

    fn ready(&self) -> bool {
        self.rx
            .borrow()
            .as_ref()
            .map(RawFrame::has_dimensions)
            .unwrap_or(false)
    }
}

///Compresses the source's current frame into a `FrameBuffer`.
pub trait FrameEncoder: Send + Sync {
    fn encode(&self, source: &dyn FrameSource) -> Result<FrameBuffer, EncodeError>;
}

///Outbound half of the streaming channel as seen by the pump and session.
///`try_send` is fire-and-forget: it reports whether the frame was handed to
///the connection, and a `false` is a dropped frame, never an error.
pub trait FrameChannel: Send + Sync {
    fn state(&self) -> ChannelState;

    ///Hand one frame to the connection. Returns false (and drops the frame)
    ///unless the channel is `Open` and no other frame is in flight.
    fn try_send(&self, frame: FrameBuffer) -> bool;

    ///Begin closing the connection. Idempotent, callable from any state.
    fn close(&self);
}

///Consumes inbound processed frames. `on_frame` replaces whatever was
///displayed; `clear` empties the render target.
pub trait ResultSink: Send + Sync {
    fn on_frame(&self, frame: FrameBuffer);
    fn clear(&self);
}

///What to capture from.
#[derive(Clone, Debug)]
pub enum SourceKind {
    Camera,
    FileVideo(PathBuf),
}

///Geometry and rate every acquired source is normalized to.
#[derive(Clone, Debug, Deserialize)]
pub struct CaptureConstraints {
    pub width: u16,
    pub height: u16,
    pub framerate: u8,
    pub device: String,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            framerate: 10,
            device: "/dev/video0".to_string(),
        }
    }
}

///Acquires live media sources. Camera acquisition holds exclusive hardware
///until the returned source is released.
#[async_trait]
pub trait MediaAcquirer: Send + Sync {
    async fn acquire(
        &self,
        kind: &SourceKind,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn MediaSource>, AcquisitionError>;
}

///Opens a streaming channel wired to the given sink. The returned channel
///starts `Connecting`; the transition to `Open` (or failure) arrives on the
///event receiver, not as a return value.
pub trait ChannelOpener: Send + Sync {
    fn open(&self, sink: Arc<dyn ResultSink>) -> (Box<dyn FrameChannel>, mpsc::Receiver<ChannelEvent>);
}

///The content being stylized: a still image, or a live source to stream.
#[derive(Clone)]
pub enum ContentSpec {
    Image(Vec<u8>),
    Camera,
    FileVideo(PathBuf),
}

impl ContentSpec {
    ///The capture kind, if this content is a live source.
    pub fn live_kind(&self) -> Option<SourceKind> {
        match self {
            Self::Image(_) => None,
            Self::Camera => Some(SourceKind::Camera),
            Self::FileVideo(path) => Some(SourceKind::FileVideo(path.clone())),
        }
    }
}

impl fmt::Debug for ContentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image(bytes) => write!(f, "Image({} bytes)", bytes.len()),
            Self::Camera => write!(f, "Camera"),
            Self::FileVideo(path) => write!(f, "FileVideo({})", path.display()),
        }
    }
}

///Which style to apply: a preset known to the service, or raw image bytes.
#[derive(Clone)]
pub enum StyleSpec {
    Preset(String),
    Image(Vec<u8>),
}

impl fmt::Debug for StyleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preset(name) => write!(f, "Preset({})", name),
            Self::Image(bytes) => write!(f, "Image({} bytes)", bytes.len()),
        }
    }
}

///The one-shot request path: one request, one processed image back.
#[async_trait]
pub trait StyleService: Send + Sync {
    async fn stylize_image(
        &self,
        content: Vec<u8>,
        style: &StyleSpec,
        model: &str,
    ) -> Result<Vec<u8>, UpstreamError>;
}
