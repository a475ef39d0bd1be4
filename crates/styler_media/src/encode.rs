use jpeg_encoder::{ColorType, Encoder};
use styler_core::error::EncodeError;
use styler_core::{FrameBuffer, FrameEncoder, FrameSource};

///Compresses the source's current frame to JPEG at a fixed quality.
///Stateless beyond the quality knob: each call reads one frame, allocates
///one buffer, and retains neither.
pub struct JpegFrameEncoder {
    quality: u8,
}

impl JpegFrameEncoder {
    pub fn new(quality: u8) -> Self {
        Self { quality }
    }
}

impl FrameEncoder for JpegFrameEncoder {
    fn encode(&self, source: &dyn FrameSource) -> Result<FrameBuffer, EncodeError> {
        let frame = source.current_frame().ok_or(EncodeError::SourceNotReady)?;
        if !frame.has_dimensions() {
            return Err(EncodeError::SourceNotReady);
        }

        let mut jpeg = Vec::with_capacity(frame.pixels.len() / 8);
        let encoder = Encoder::new(&mut jpeg, self.quality);
        encoder
            .encode(&frame.pixels, frame.width, frame.height, ColorType::Rgb)
            .map_err(|err| EncodeError::Codec(err.to_string()))?;

        Ok(FrameBuffer::new(jpeg))
    }
}
