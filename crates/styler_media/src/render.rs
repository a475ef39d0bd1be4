use styler_core::{DisplayFrame, FrameBuffer, ResultSink};
use tokio::sync::watch;
use tracing::{debug, warn};

///Displays the latest successfully decoded inbound frame on a single watch
///surface: a newer arrival always replaces an older one and nothing is ever
///queued. Frames are decode-verified before they become visible, so an
///undecodable frame leaves the previous one displayed.
///
///Inbound frames carry no correlation to the outbound stream; if the remote
///finishes processing out of order, latest-arrival-wins can briefly show a
///frame older than one already displayed. Acceptable for a live preview.
pub struct Renderer {
    surface: watch::Sender<Option<DisplayFrame>>,
}

impl Renderer {
    pub fn new() -> Self {
        let (surface, _) = watch::channel(None);
        Self { surface }
    }

    ///The display surface. Holds only the latest frame; `None` when cleared.
    pub fn frames(&self) -> watch::Receiver<Option<DisplayFrame>> {
        self.surface.subscribe()
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSink for Renderer {
    fn on_frame(&self, frame: FrameBuffer) {
        match image::load_from_memory(&frame.bytes) {
            Ok(decoded) => {
                debug!("displaying frame ({} bytes)", frame.bytes.len());
                self.surface.send_replace(Some(DisplayFrame {
                    width: decoded.width(),
                    height: decoded.height(),
                    bytes: frame.bytes,
                }));
            }
            Err(err) => {
                warn!("dropping undecodable frame: {}", err);
            }
        }
    }

    fn clear(&self) {
        self.surface.send_replace(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::JpegFrameEncoder;
    use crate::pattern::PatternSource;
    use styler_core::{FrameEncoder, MediaSource};

    fn two_distinct_jpegs() -> (FrameBuffer, FrameBuffer) {
        let source = PatternSource::new(32, 24);
        let reader = source.reader();
        let encoder = JpegFrameEncoder::new(80);
        (encoder.encode(&*reader).unwrap(), encoder.encode(&*reader).unwrap())
    }

    #[test]
    fn latest_arrival_wins() {
        let renderer = Renderer::new();
        let surface = renderer.frames();
        let (f1, f2) = two_distinct_jpegs();

        renderer.on_frame(f1);
        renderer.on_frame(f2.clone());

        let shown = surface.borrow().clone().expect("a frame should be displayed");
        assert_eq!(shown.bytes, f2.bytes);
    }

    #[test]
    fn undecodable_frame_keeps_the_previous_one() {
        let renderer = Renderer::new();
        let surface = renderer.frames();
        let (f1, _) = two_distinct_jpegs();

        renderer.on_frame(f1.clone());
        renderer.on_frame(FrameBuffer::new(vec![0xDE, 0xAD, 0xBE, 0xEF]));

        let shown = surface.borrow().clone().expect("previous frame should remain");
        assert_eq!(shown.bytes, f1.bytes);
    }

    #[test]
    fn clear_empties_the_surface() {
        let renderer = Renderer::new();
        let surface = renderer.frames();
        let (f1, _) = two_distinct_jpegs();

        renderer.on_frame(f1);
        renderer.clear();
        assert!(surface.borrow().is_none());
    }

    #[test]
    fn decoded_dimensions_are_recorded() {
        let renderer = Renderer::new();
        let surface = renderer.frames();
        let (f1, _) = two_distinct_jpegs();

        renderer.on_frame(f1);
        let shown = surface.borrow().clone().unwrap();
        assert_eq!((shown.width, shown.height), (32, 24));
    }
}
