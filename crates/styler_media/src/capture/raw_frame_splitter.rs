use styler_core::RawFrame;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

///Chunks a raw RGB24 byte stream into exact `width * height * 3` frames and
///publishes each completed frame as the source's latest. Chunk boundaries
///never line up with frame boundaries, so partial frames accumulate across
///reads; a trailing partial frame at EOF is dropped.
pub fn split_raw_frames(
    mut byte_stream: impl AsyncRead + Unpin + Send + 'static,
    width: u16,
    height: u16,
    frames_tx: watch::Sender<Option<RawFrame>>,
) -> JoinHandle<()> {
    let frame_len = width as usize * height as usize * 3;

    tokio::spawn(async move {
        let mut buf = vec![0u8; 64 * 1024];
        let mut frame: Vec<u8> = Vec::with_capacity(frame_len);

        while let Ok(bytes) = byte_stream.read(&mut buf).await {
            if bytes == 0 {
                break;
            }
            let mut rest = &buf[..bytes];
            while !rest.is_empty() {
                let needed = frame_len - frame.len();
                let take = needed.min(rest.len());
                frame.extend_from_slice(&rest[..take]);
                rest = &rest[take..];

                if frame.len() == frame_len {
                    let pixels = std::mem::replace(&mut frame, Vec::with_capacity(frame_len));
                    frames_tx.send_replace(Some(RawFrame { width, height, pixels }));
                }
            }
        }
        info!("capture byte stream ended.");
    })
}
