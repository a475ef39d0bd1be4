//!Acquisition of live media sources. Both camera and file playback are
//!normalized through the same capture pipeline: an ffmpeg child process
//!emitting fixed-geometry raw RGB24 frames on stdout, split into frames and
//!published as the source's latest.

mod child_process_stream;
mod raw_frame_splitter;

use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use styler_core::error::AcquisitionError;
use styler_core::{
    CaptureConstraints, FrameSource, MediaAcquirer, MediaSource, RawFrame, SourceKind,
    WatchFrameSource,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use child_process_stream::start_child_process;
use raw_frame_splitter::split_raw_frames;

///File extensions the capture pipeline will try to play.
const PLAYABLE_EXTENSIONS: &[&str] = &["mp4", "webm", "avi", "mov", "mkv"];

///Acquires `LiveSource`s by spawning ffmpeg against a V4L2 device or a
///video file.
pub struct FfmpegAcquirer;

#[async_trait]
impl MediaAcquirer for FfmpegAcquirer {
    async fn acquire(
        &self,
        kind: &SourceKind,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn MediaSource>, AcquisitionError> {
        let args = match kind {
            SourceKind::Camera => {
                probe_device(&constraints.device).await?;
                camera_args(constraints)
            }
            SourceKind::FileVideo(path) => {
                probe_file(path).await?;
                file_args(path, constraints)
            }
        };

        let cancel = CancellationToken::new();
        let stdout = start_child_process("ffmpeg", &args, cancel.clone())
            .map_err(|err| AcquisitionError::Spawn(err.to_string()))?;

        let (frames_tx, frames_rx) = watch::channel(None::<RawFrame>);
        let _splitter = split_raw_frames(stdout, constraints.width, constraints.height, frames_tx);

        Ok(Box::new(LiveSource { frames: frames_rx, cancel }))
    }
}

///The camera device has to exist and be readable before ffmpeg is asked to
///hold it.
async fn probe_device(device: &str) -> Result<(), AcquisitionError> {
    match tokio::fs::File::open(device).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == ErrorKind::PermissionDenied => {
            Err(AcquisitionError::PermissionDenied)
        }
        Err(err) => Err(AcquisitionError::DeviceUnavailable(err.to_string())),
    }
}

async fn probe_file(path: &Path) -> Result<(), AcquisitionError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext {
        Some(ext) if PLAYABLE_EXTENSIONS.contains(&ext.as_str()) => {}
        _ => {
            return Err(AcquisitionError::UnsupportedFormat(format!(
                "cannot play {}",
                path.display()
            )))
        }
    }
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(()),
        Err(err) => Err(AcquisitionError::UnsupportedFormat(err.to_string())),
    }
}

fn camera_args(constraints: &CaptureConstraints) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        "v4l2".into(),
        "-framerate".into(),
        constraints.framerate.to_string(),
        "-video_size".into(),
        format!("{}x{}", constraints.width, constraints.height),
        "-i".into(),
        constraints.device.clone(),
        "-vf".into(),
        format!("scale={}:{}", constraints.width, constraints.height),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgb24".into(),
        "-".into(),
    ]
}

fn file_args(path: &Path, constraints: &CaptureConstraints) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        //pace playback at the file's native rate and loop it, like a
        //looping video element
        "-re".into(),
        "-stream_loop".into(),
        "-1".into(),
        "-i".into(),
        path.display().to_string(),
        "-vf".into(),
        format!("scale={}:{}", constraints.width, constraints.height),
        "-r".into(),
        constraints.framerate.to_string(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgb24".into(),
        "-".into(),
    ]
}

///A live capture pipeline. Released by cancelling its token, which kills
///the child process; releasing twice is a no-op.
pub struct LiveSource {
    frames: watch::Receiver<Option<RawFrame>>,
    cancel: CancellationToken,
}

impl MediaSource for LiveSource {
    fn reader(&self) -> Box<dyn FrameSource> {
        Box::new(WatchFrameSource::new(self.frames.clone()))
    }

    fn release(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn unknown_extension_is_unsupported() {
        let err = probe_file(Path::new("movie.gif")).await.unwrap_err();
        assert!(matches!(err, AcquisitionError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn missing_file_is_unsupported() {
        let err = probe_file(Path::new("/definitely/not/here.mp4")).await.unwrap_err();
        assert!(matches!(err, AcquisitionError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn missing_device_is_unavailable() {
        let acquirer = FfmpegAcquirer;
        let constraints = CaptureConstraints {
            device: "/dev/video-that-does-not-exist".to_string(),
            ..CaptureConstraints::default()
        };
        let err = acquirer
            .acquire(&SourceKind::Camera, &constraints)
            .await
            .err()
            .expect("acquire should fail");
        assert!(matches!(err, AcquisitionError::DeviceUnavailable(_)));
    }

    #[tokio::test]
    async fn file_kind_carries_its_path() {
        let kind = SourceKind::FileVideo(PathBuf::from("clip.mp4"));
        match kind {
            SourceKind::FileVideo(path) => assert_eq!(path, PathBuf::from("clip.mp4")),
            _ => unreachable!(),
        }
    }
}
