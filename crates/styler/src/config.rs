//!Typed configuration for the styler binary, plus the wiring that turns a
//!parsed config into a running session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use styler_core::error::SessionError;
use styler_core::session::{
    SessionController, SessionDeps, SessionHandle, SessionMode, SessionState, StartRequest,
};
use styler_core::{CaptureConstraints, ContentSpec, DisplayFrame, StyleSpec};
use styler_media::{FfmpegAcquirer, JpegFrameEncoder, Renderer};
use styler_net::{HttpStyleService, WsChannelOpener};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Deserialize, Debug, Default)]
pub struct Metadata {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ApiConfig {
    ///Base URL of the style service, e.g. `http://localhost:8000`
    pub base_url: String,
    ///Streaming endpoint, e.g. `ws://localhost:8000/ws/video`
    pub stream_endpoint: String,
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u16,
    pub height: u16,
    pub framerate: u8,
    pub quality: u8,
    pub device: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            framerate: 10,
            quality: 80,
            device: "/dev/video0".to_string(),
        }
    }
}

impl CaptureConfig {
    fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            width: self.width,
            height: self.height,
            framerate: self.framerate,
            device: self.device.clone(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ModeConfig {
    ///One request, one processed image back
    Image,
    ///Continuous frame streaming from a live source
    Stream,
}

//config-rs lowercases table keys, so variant tags must be lowercase
#[derive(Deserialize, Debug)]
#[serde(rename_all = "lowercase")]
pub enum ContentConfig {
    Image { path: PathBuf },
    Video { path: PathBuf },
    Camera,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "lowercase")]
pub enum StyleConfig {
    Preset { name: String },
    Image { path: PathBuf },
}

fn default_model() -> String {
    "adain".to_string()
}

#[derive(Deserialize, Debug)]
pub struct SessionConfig {
    pub mode: ModeConfig,
    #[serde(default = "default_model")]
    pub model: String,
    pub content: ContentConfig,
    pub style: StyleConfig,
    ///Where the displayed result lands: the single result image, or a
    ///mirror of the latest streamed frame
    pub output: PathBuf,
}

#[derive(Deserialize, Debug)]
pub struct StylerConfig {
    #[serde(default)]
    pub metadata: Metadata,
    pub api: ApiConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    pub session: SessionConfig,
}

impl StylerConfig {
    pub async fn start(self) -> Result<(), SessionError> {
        let service = Arc::new(HttpStyleService::new(&self.api.base_url));
        let style = self.resolve_style(&service).await?;
        let content = self.resolve_content().await?;

        let renderer = Arc::new(Renderer::new());
        let mut display = renderer.frames();

        let session = SessionController::spawn(SessionDeps {
            acquirer: Arc::new(FfmpegAcquirer),
            opener: Arc::new(WsChannelOpener::new(&self.api.stream_endpoint)),
            encoder: Arc::new(JpegFrameEncoder::new(self.capture.quality)),
            sink: renderer.clone(),
            service,
            constraints: self.capture.constraints(),
        });

        let mode = match self.session.mode {
            ModeConfig::Image => SessionMode::SingleImage,
            ModeConfig::Stream => SessionMode::Streaming,
        };
        let request = StartRequest {
            mode,
            model: self.session.model.clone(),
            content: Some(content),
            style: Some(style),
        };

        session.start(request).await?;

        match mode {
            SessionMode::SingleImage => {
                //the round trip already completed; persist what is displayed
                let frame = display.borrow().clone();
                match frame {
                    Some(frame) => write_frame(&self.session.output, &frame).await,
                    None => Err(SessionError::Internal("no result was displayed".to_string())),
                }
            }
            SessionMode::Streaming => {
                mirror_stream(&session, &mut display, &self.session.output).await
            }
        }
    }

    async fn resolve_style(&self, service: &HttpStyleService) -> Result<StyleSpec, SessionError> {
        match &self.session.style {
            StyleConfig::Preset { name } => {
                //the catalog is what a UI would have offered; a missing
                //preset is almost certainly a config typo, but the service
                //has the final say
                match service.styles().await {
                    Ok(entries) if !entries.iter().any(|e| e.id == *name) => {
                        warn!("style '{}' is not in the service catalog", name);
                    }
                    Err(err) => warn!("could not fetch style catalog: {}", err),
                    _ => {}
                }
                Ok(StyleSpec::Preset(name.clone()))
            }
            StyleConfig::Image { path } => {
                let bytes = tokio::fs::read(path).await.map_err(|err| {
                    SessionError::Internal(format!("could not read style image {}: {}", path.display(), err))
                })?;
                Ok(StyleSpec::Image(bytes))
            }
        }
    }

    async fn resolve_content(&self) -> Result<ContentSpec, SessionError> {
        match &self.session.content {
            ContentConfig::Image { path } => {
                let bytes = tokio::fs::read(path).await.map_err(|err| {
                    SessionError::Internal(format!("could not read content image {}: {}", path.display(), err))
                })?;
                Ok(ContentSpec::Image(bytes))
            }
            ContentConfig::Video { path } => Ok(ContentSpec::FileVideo(path.clone())),
            ContentConfig::Camera => Ok(ContentSpec::Camera),
        }
    }
}

async fn write_frame(output: &Path, frame: &DisplayFrame) -> Result<(), SessionError> {
    tokio::fs::write(output, &frame.bytes).await.map_err(|err| {
        SessionError::Internal(format!("could not write result to {}: {}", output.display(), err))
    })?;
    info!("wrote result to {} ({} bytes)", output.display(), frame.bytes.len());
    Ok(())
}

///Run the streaming session until ctrl-c or the run ends on its own,
///mirroring each newly displayed frame to the output path.
async fn mirror_stream(
    session: &SessionHandle,
    display: &mut watch::Receiver<Option<DisplayFrame>>,
    output: &Path,
) -> Result<(), SessionError> {
    let mut status = session.status();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("stopping stream ...");
                session.stop().await;
                break Ok(());
            },
            changed = display.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let frame = display.borrow_and_update().clone();
                if let Some(frame) = frame {
                    if let Err(err) = tokio::fs::write(output, &frame.bytes).await {
                        warn!("could not mirror frame to {}: {}", output.display(), err);
                    }
                }
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = status.borrow_and_update().clone();
                if current.state == SessionState::Idle {
                    //the run ended without us: channel failure or remote close
                    break match current.last_error {
                        Some(err) => Err(err),
                        None => Ok(()),
                    };
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_rs::{Config, File, FileFormat};

    const FULL: &str = r#"
metadata:
  name: style demo
api:
  base_url: http://localhost:8000
  stream_endpoint: ws://localhost:8000/ws/video
capture:
  width: 320
  height: 240
  framerate: 5
session:
  mode: stream
  content: camera
  style:
    preset:
      name: mosaic
  output: /tmp/styled.jpg
"#;

    #[test]
    fn full_config_parses() {
        let config: StylerConfig = Config::builder()
            .add_source(File::from_str(FULL, FileFormat::Yaml))
            .build()
            .and_then(|c| c.try_deserialize())
            .expect("config should parse");

        assert_eq!(config.capture.width, 320);
        //untouched capture fields keep their defaults
        assert_eq!(config.capture.quality, 80);
        assert_eq!(config.session.model, "adain");
        assert!(matches!(config.session.mode, ModeConfig::Stream));
        assert!(matches!(config.session.content, ContentConfig::Camera));
    }

    #[test]
    fn capture_section_is_optional() {
        const MINIMAL: &str = r#"
api:
  base_url: http://localhost:8000
  stream_endpoint: ws://localhost:8000/ws/video
session:
  mode: image
  content:
    image:
      path: cat.jpg
  style:
    image:
      path: wave.jpg
  output: out.jpg
"#;
        let config: StylerConfig = Config::builder()
            .add_source(File::from_str(MINIMAL, FileFormat::Yaml))
            .build()
            .and_then(|c| c.try_deserialize())
            .expect("config should parse");

        assert_eq!(config.capture.width, 640);
        assert_eq!(config.capture.device, "/dev/video0");
    }
}
