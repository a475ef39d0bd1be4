//!The session controller: one task owning the lifecycle of a single
//!user-initiated run, either one-shot or streaming. All starts, stops and
//!channel failures are serialized through this task, so resource teardown
//!has exactly one owner.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{AcquisitionError, SessionError};
use crate::pump::FramePump;
use crate::{
    CaptureConstraints, ChannelEvent, ChannelOpener, ChannelState, ContentSpec, FrameBuffer,
    FrameChannel, FrameEncoder, MediaAcquirer, MediaSource, ResultSink, SourceKind, StyleService,
    StyleSpec,
};

///How long a live source may take to produce its first frame when capturing
///a still for the one-shot path.
const STILL_CAPTURE_DEADLINE: Duration = Duration::from_secs(5);

///How long teardown waits for the channel to report `Closed` after close().
const CLOSE_DEADLINE: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionMode {
    SingleImage,
    Streaming,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Preparing,
    Active,
    Stopping,
}

///What the controller publishes for the UI layer: current lifecycle state,
///the mode of the run it belongs to, and the last surfaced failure.
#[derive(Clone, Debug)]
pub struct SessionStatus {
    pub state: SessionState,
    pub mode: Option<SessionMode>,
    pub last_error: Option<SessionError>,
}

impl SessionStatus {
    fn idle(last_error: Option<SessionError>) -> Self {
        Self { state: SessionState::Idle, mode: None, last_error }
    }
}

///Everything a `start` needs. Content and style are optional here so that
///validation (and its `MissingInput` rejection) lives in the controller,
///before any resource is touched.
#[derive(Debug)]
pub struct StartRequest {
    pub mode: SessionMode,
    pub model: String,
    pub content: Option<ContentSpec>,
    pub style: Option<StyleSpec>,
}

///Collaborators the controller wires together for each run.
pub struct SessionDeps {
    pub acquirer: Arc<dyn MediaAcquirer>,
    pub opener: Arc<dyn ChannelOpener>,
    pub encoder: Arc<dyn FrameEncoder>,
    pub sink: Arc<dyn ResultSink>,
    pub service: Arc<dyn StyleService>,
    pub constraints: CaptureConstraints,
}

enum SessionCmd {
    Start(StartRequest, oneshot::Sender<Result<(), SessionError>>),
    Stop(oneshot::Sender<()>),
}

///Cheap handle onto the controller task. Dropping the last handle tears the
///current run down and ends the task.
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCmd>,
    status_rx: watch::Receiver<SessionStatus>,
    pub join_handle: JoinHandle<()>,
}

impl SessionHandle {
    ///Validate and begin a run. For single-image mode this resolves when the
    ///round trip completes; for streaming mode it resolves once the run is
    ///active (connection failures arrive later, on the status watch).
    pub async fn start(&self, request: StartRequest) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCmd::Start(request, reply_tx))
            .await
            .map_err(|_| SessionError::Internal("session controller is gone".to_string()))?;
        reply_rx
            .await
            .map_err(|_| SessionError::Internal("session controller dropped the request".to_string()))?
    }

    ///Tear the current run down. Resolves once teardown has finished; a
    ///no-op when nothing is running.
    pub async fn stop(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.cmd_tx.send(SessionCmd::Stop(reply_tx)).await.is_ok() {
            let _ = reply_rx.await;
        }
    }

    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }
}

pub struct SessionController {
    deps: SessionDeps,
    status_tx: watch::Sender<SessionStatus>,
    evt_tx: mpsc::Sender<(u64, ChannelEvent)>,
    active: Option<ActiveRun>,
    next_run_id: u64,
}

struct ActiveRun {
    id: u64,
    source: Box<dyn MediaSource>,
    channel: Arc<dyn FrameChannel>,
    pump: Option<FramePump>,
    relay: JoinHandle<()>,
}

///Forwards channel events into the controller loop, tagged with the run
///they belong to so events from a finished run are ignored.
fn spawn_event_relay(
    run_id: u64,
    mut events: mpsc::Receiver<ChannelEvent>,
    tx: mpsc::Sender<(u64, ChannelEvent)>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(ev) = events.recv().await {
            if tx.send((run_id, ev)).await.is_err() {
                break;
            }
        }
        debug!("channel event relay shutting down!");
    })
}

impl SessionController {
    pub fn spawn(deps: SessionDeps) -> SessionHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (status_tx, status_rx) = watch::channel(SessionStatus::idle(None));
        let (evt_tx, evt_rx) = mpsc::channel(8);

        let controller = SessionController {
            deps,
            status_tx,
            evt_tx,
            active: None,
            next_run_id: 0,
        };
        let join_handle = tokio::spawn(controller.run(cmd_rx, evt_rx));

        SessionHandle { cmd_tx, status_rx, join_handle }
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<SessionCmd>,
        mut evt_rx: mpsc::Receiver<(u64, ChannelEvent)>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(SessionCmd::Start(request, reply)) => {
                        let res = self.handle_start(request).await;
                        if let Err(ref err) = res {
                            self.status_tx.send_replace(SessionStatus::idle(Some(err.clone())));
                        }
                        let _ = reply.send(res);
                    }
                    Some(SessionCmd::Stop(reply)) => {
                        self.stop_run(None).await;
                        let _ = reply.send(());
                    }
                    None => {
                        self.stop_run(None).await;
                        break;
                    }
                },
                Some((run_id, ev)) = evt_rx.recv() => {
                    self.on_channel_event(run_id, ev).await;
                },
            }
        }
        debug!("session controller shutting down!");
    }

    async fn handle_start(&mut self, request: StartRequest) -> Result<(), SessionError> {
        //reject before any resource is acquired or released
        let content = request.content.ok_or(SessionError::MissingInput("content"))?;
        let style = request.style.ok_or(SessionError::MissingInput("style"))?;

        //a new run never overlaps the previous one
        if self.active.is_some() {
            self.stop_run(None).await;
        }

        match request.mode {
            SessionMode::SingleImage => {
                self.run_single_image(content, style, &request.model).await
            }
            SessionMode::Streaming => self.start_streaming(content).await,
        }
    }

    async fn run_single_image(
        &mut self,
        content: ContentSpec,
        style: StyleSpec,
        model: &str,
    ) -> Result<(), SessionError> {
        self.publish(SessionState::Preparing, SessionMode::SingleImage);

        let content_bytes = match content {
            ContentSpec::Image(bytes) => bytes,
            ContentSpec::Camera => self.capture_still(SourceKind::Camera).await?,
            ContentSpec::FileVideo(path) => self.capture_still(SourceKind::FileVideo(path)).await?,
        };

        self.publish(SessionState::Active, SessionMode::SingleImage);
        let result = self.deps.service.stylize_image(content_bytes, &style, model).await;
        match result {
            Ok(bytes) => {
                info!("one-shot result received ({} bytes)", bytes.len());
                self.deps.sink.on_frame(FrameBuffer::new(bytes));
                self.status_tx.send_replace(SessionStatus::idle(None));
                Ok(())
            }
            Err(err) => Err(SessionError::Upstream(err)),
        }
    }

    ///Grab one frame from a live source for the one-shot path: acquire,
    ///wait for readiness, encode, release. The source never outlives this
    ///call.
    async fn capture_still(&self, kind: SourceKind) -> Result<Vec<u8>, SessionError> {
        let source = self.deps.acquirer.acquire(&kind, &self.deps.constraints).await?;
        let reader = source.reader();

        let poll = Duration::from_millis(50);
        let mut waited = Duration::ZERO;
        let encoded = loop {
            if reader.ready() {
                break self.deps.encoder.encode(&*reader);
            }
            if waited >= STILL_CAPTURE_DEADLINE {
                source.release();
                return Err(SessionError::Acquisition(AcquisitionError::DeviceUnavailable(
                    "source produced no frames".to_string(),
                )));
            }
            tokio::time::sleep(poll).await;
            waited += poll;
        };
        source.release();

        encoded
            .map(|frame| frame.bytes)
            .map_err(|err| SessionError::Internal(format!("could not capture still frame: {}", err)))
    }

    async fn start_streaming(&mut self, content: ContentSpec) -> Result<(), SessionError> {
        let kind = content
            .live_kind()
            .ok_or(SessionError::MissingInput("live content source"))?;

        self.publish(SessionState::Preparing, SessionMode::Streaming);
        let source = self.deps.acquirer.acquire(&kind, &self.deps.constraints).await?;

        let (channel, events) = self.deps.opener.open(self.deps.sink.clone());
        let channel: Arc<dyn FrameChannel> = Arc::from(channel);

        let run_id = self.next_run_id;
        self.next_run_id += 1;
        let relay = spawn_event_relay(run_id, events, self.evt_tx.clone());

        let pump = FramePump::spawn(
            source.reader(),
            channel.clone(),
            self.deps.encoder.clone(),
            self.tick_period(),
        );

        self.active = Some(ActiveRun { id: run_id, source, channel, pump: Some(pump), relay });
        self.publish(SessionState::Active, SessionMode::Streaming);
        Ok(())
    }

    async fn on_channel_event(&mut self, run_id: u64, ev: ChannelEvent) {
        let current = self.active.as_ref().map(|run| run.id);
        if current != Some(run_id) {
            debug!("ignoring channel event from a finished run");
            return;
        }
        match ev {
            ChannelEvent::Opened => debug!("stream channel is open"),
            ChannelEvent::Closed => {
                info!("stream channel closed, ending run");
                self.stop_run(None).await;
            }
            ChannelEvent::Error(err) => {
                warn!("stream channel failed: {}", err);
                self.stop_run(Some(SessionError::Channel(err))).await;
            }
        }
    }

    ///Total teardown, in order: pump, channel, source, display. Every step
    ///runs even when an earlier one misbehaves.
    async fn stop_run(&mut self, error: Option<SessionError>) {
        if let Some(mut run) = self.active.take() {
            self.publish(SessionState::Stopping, SessionMode::Streaming);

            if let Some(pump) = run.pump.take() {
                pump.stop().await;
            }

            run.channel.close();
            self.await_channel_closed(&*run.channel).await;

            run.source.release();
            run.relay.abort();

            self.deps.sink.clear();
        }
        self.status_tx.send_replace(SessionStatus::idle(error));
    }

    async fn await_channel_closed(&self, channel: &dyn FrameChannel) {
        let mut waited = Duration::ZERO;
        let poll = Duration::from_millis(10);
        while channel.state() != ChannelState::Closed {
            if waited >= CLOSE_DEADLINE {
                warn!("channel did not report closed before teardown deadline");
                break;
            }
            tokio::time::sleep(poll).await;
            waited += poll;
        }
    }

    fn publish(&self, state: SessionState, mode: SessionMode) {
        self.status_tx.send_replace(SessionStatus {
            state,
            mode: Some(mode),
            last_error: None,
        });
    }

    fn tick_period(&self) -> Duration {
        let fps = self.deps.constraints.framerate.max(1) as u64;
        Duration::from_millis(1000 / fps)
    }
}
