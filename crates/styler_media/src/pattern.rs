use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use embedded_graphics::{
    mono_font::{ascii::FONT_10X20, MonoTextStyle},
    pixelcolor::Rgb888,
    prelude::*,
    primitives::Rectangle,
    text::{renderer::CharacterStyle, Alignment, Text},
};
use styler_core::{FrameSource, MediaSource, RawFrame};

///An RGB24 buffer embedded-graphics can draw into.
struct PatternCanvas {
    width: u16,
    height: u16,
    pixels: Vec<u8>,
}

impl PatternCanvas {
    fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 3],
        }
    }

    fn into_frame(self) -> RawFrame {
        RawFrame {
            width: self.width,
            height: self.height,
            pixels: self.pixels,
        }
    }
}

impl OriginDimensions for PatternCanvas {
    fn size(&self) -> Size {
        Size::new(self.width as u32, self.height as u32)
    }
}

impl DrawTarget for PatternCanvas {
    type Color = Rgb888;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x < 0
                || point.y < 0
                || point.x >= self.width as i32
                || point.y >= self.height as i32
            {
                continue;
            }
            let idx = (point.y as usize * self.width as usize + point.x as usize) * 3;
            self.pixels[idx] = color.r();
            self.pixels[idx + 1] = color.g();
            self.pixels[idx + 2] = color.b();
        }
        Ok(())
    }
}

fn render_pattern(width: u16, height: u16, n: u32) -> RawFrame {
    let mut canvas = PatternCanvas::new(width, height);
    let w = width as usize;
    let h = height as usize;

    canvas
        .fill_solid(&Rectangle::new(Point::zero(), canvas.size()), Rgb888::WHITE)
        .unwrap();

    //color bars over the top three quarters
    let stride = (w / 7).max(1);
    let bar_height = h * 3 / 4;
    for (i, color) in [
        Rgb888::CSS_RED,
        Rgb888::CSS_YELLOW,
        Rgb888::CSS_GREEN,
        Rgb888::CSS_CYAN,
        Rgb888::CSS_BLUE,
        Rgb888::CSS_MAGENTA,
    ]
    .iter()
    .enumerate()
    {
        let x = stride * i;
        canvas
            .fill_solid(
                &Rectangle::new(
                    Point::new(x as i32, 0),
                    Size::new(stride as u32, bar_height as u32),
                ),
                *color,
            )
            .unwrap();
    }

    //gradient along the bottom, shifted each frame so reads never repeat
    for x in 0..w {
        let xx = ((x * 255 / w.max(1)) as u32 + n) % 256;
        let color = Rgb888::new(xx as u8, xx as u8, xx as u8);
        canvas
            .fill_solid(
                &Rectangle::new(
                    Point::new(x as i32, bar_height as i32),
                    Size::new(1, (h - bar_height) as u32),
                ),
                color,
            )
            .unwrap();
    }

    //frame counter, when there is room for the font
    if width >= 120 && height >= 60 {
        let mut style = MonoTextStyle::new(&FONT_10X20, Rgb888::WHITE);
        style.set_background_color(Some(Rgb888::BLACK));
        let label = format!("frame {}", n);
        Text::with_alignment(
            &label,
            Point::new((w / 2) as i32, (h / 3) as i32),
            style,
            Alignment::Center,
        )
        .draw(&mut canvas)
        .unwrap();
    }

    canvas.into_frame()
}

struct PatternState {
    counter: AtomicU32,
    released: AtomicBool,
}

///A synthetic media source: color bars with a moving gradient and a frame
///counter, so consecutive reads yield distinct frames. Stands in for real
///capture hardware in tests and demos. Reading after release yields
///nothing, like a stopped camera track.
pub struct PatternSource {
    width: u16,
    height: u16,
    state: Arc<PatternState>,
}

impl PatternSource {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            state: Arc::new(PatternState {
                counter: AtomicU32::new(0),
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_released(&self) -> bool {
        self.state.released.load(Ordering::SeqCst)
    }
}

struct PatternReader {
    width: u16,
    height: u16,
    state: Arc<PatternState>,
}

impl FrameSource for PatternReader {
    fn current_frame(&self) -> Option<RawFrame> {
        if self.state.released.load(Ordering::SeqCst) {
            return None;
        }
        let n = self.state.counter.fetch_add(1, Ordering::SeqCst);
        Some(render_pattern(self.width, self.height, n))
    }

    fn ready(&self) -> bool {
        !self.state.released.load(Ordering::SeqCst)
    }
}

impl MediaSource for PatternSource {
    fn reader(&self) -> Box<dyn FrameSource> {
        Box::new(PatternReader {
            width: self.width,
            height: self.height,
            state: self.state.clone(),
        })
    }

    fn release(&self) {
        self.state.released.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_have_the_requested_geometry() {
        let source = PatternSource::new(64, 48);
        let frame = source.reader().current_frame().unwrap();
        assert_eq!((frame.width, frame.height), (64, 48));
        assert_eq!(frame.pixels.len(), 64 * 48 * 3);
    }

    #[test]
    fn released_source_stops_producing() {
        let source = PatternSource::new(64, 48);
        let reader = source.reader();
        assert!(reader.ready());

        source.release();
        source.release(); //idempotent
        assert!(!reader.ready());
        assert!(reader.current_frame().is_none());
        assert!(source.is_released());
    }
}
