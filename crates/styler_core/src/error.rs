//!A mod for the error types.
use std::fmt;

///Failure acquiring a live media source. Aborts the streaming run; never
///retried automatically.
#[derive(Clone, Debug, PartialEq)]
pub enum AcquisitionError {
    PermissionDenied,
    DeviceUnavailable(String),
    UnsupportedFormat(String),
    Spawn(String),
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "permission to use the capture device was denied"),
            Self::DeviceUnavailable(reason) => write!(f, "capture device unavailable: {}", reason),
            Self::UnsupportedFormat(reason) => write!(f, "unsupported media: {}", reason),
            Self::Spawn(reason) => write!(f, "could not start capture pipeline: {}", reason),
        }
    }
}

///Per-frame encode failure. Logged and skipped; one bad frame never ends a
///streaming run.
#[derive(Clone, Debug, PartialEq)]
pub enum EncodeError {
    SourceNotReady,
    Codec(String),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceNotReady => write!(f, "source has no decodable frame yet"),
            Self::Codec(reason) => write!(f, "frame encoding failed: {}", reason),
        }
    }
}

///Streaming channel failure. Transitions the channel to closed and ends the
///run; there is no reconnect.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelError {
    Connect(String),
    AbruptClose,
    Protocol(String),
    Io(String),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(reason) => write!(f, "could not connect to stream endpoint: {}", reason),
            Self::AbruptClose => write!(f, "stream connection closed by remote"),
            Self::Protocol(reason) => write!(f, "stream protocol error: {}", reason),
            Self::Io(reason) => write!(f, "stream transport error: {}", reason),
        }
    }
}

///Non-success from the one-shot image endpoint.
#[derive(Clone, Debug, PartialEq)]
pub enum UpstreamError {
    Status { code: u16, reason: String },
    Payload(String),
    Transport(String),
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status { code, reason } => write!(f, "service returned {}: {}", code, reason),
            Self::Payload(reason) => write!(f, "could not interpret service response: {}", reason),
            Self::Transport(reason) => write!(f, "request failed: {}", reason),
        }
    }
}

///Everything the session controller surfaces to its caller.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionError {
    MissingInput(&'static str),
    Acquisition(AcquisitionError),
    Channel(ChannelError),
    Upstream(UpstreamError),
    Internal(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingInput(which) => write!(f, "missing required input: {}", which),
            Self::Acquisition(err) => write!(f, "{}", err),
            Self::Channel(err) => write!(f, "{}", err),
            Self::Upstream(err) => write!(f, "{}", err),
            Self::Internal(reason) => write!(f, "internal session error: {}", reason),
        }
    }
}

impl From<AcquisitionError> for SessionError {
    fn from(err: AcquisitionError) -> Self {
        Self::Acquisition(err)
    }
}

impl From<ChannelError> for SessionError {
    fn from(err: ChannelError) -> Self {
        Self::Channel(err)
    }
}

impl From<UpstreamError> for SessionError {
    fn from(err: UpstreamError) -> Self {
        Self::Upstream(err)
    }
}
