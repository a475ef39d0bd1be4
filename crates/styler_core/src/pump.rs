//!The frame pump: a rate-limited, readiness-gated generator of outbound
//!frames. One step per display tick, at most one frame in flight per step,
//!no queue anywhere.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{ChannelState, FrameChannel, FrameEncoder, FrameSource};

///What a single pump step should do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    ///Reschedule without doing work. The channel may still be connecting or
    ///the source may not have produced a frame yet.
    Wait,
    ///Encode the current frame and attempt to send it.
    Capture,
}

///Decide what this tick does. Pure: the whole send-if-open-else-reschedule
///policy lives here.
pub fn decide(channel: ChannelState, source_ready: bool) -> Action {
    match channel {
        ChannelState::Open if source_ready => Action::Capture,
        _ => Action::Wait,
    }
}

///A running pump task. Stopping it is the only way it ends; it never stops
///itself while its session is alive.
pub struct FramePump {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl FramePump {
    ///Spawn the pump loop: one step per `period`, each step consulting
    ///`decide` and sending at most one frame.
    pub fn spawn(
        source: Box<dyn FrameSource>,
        channel: Arc<dyn FrameChannel>,
        encoder: Arc<dyn FrameEncoder>,
        period: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let handle = spawn_pump_task(source, channel, encoder, period, cancel.clone());
        Self { cancel, handle }
    }

    ///Signal termination and wait for the loop to observe it. The signal is
    ///seen before the next step runs, so no send can happen after this
    ///returns.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.handle.await {
            warn!("pump task did not shut down cleanly: {}", err);
        }
    }
}

fn spawn_pump_task(
    source: Box<dyn FrameSource>,
    channel: Arc<dyn FrameChannel>,
    encoder: Arc<dyn FrameEncoder>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        //a slow step must not be followed by a burst of catch-up steps
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    break;
                },
                _ = ticker.tick() => {
                    match decide(channel.state(), source.ready()) {
                        Action::Wait => {}
                        Action::Capture => match encoder.encode(&*source) {
                            Ok(frame) => {
                                if !channel.try_send(frame) {
                                    debug!("channel not accepting frames, dropped one");
                                }
                            }
                            Err(err) => {
                                debug!("skipping frame: {}", err);
                            }
                        },
                    }
                },
            }
        }
        debug!("frame pump shutting down!");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::error::EncodeError;
    use crate::{FrameBuffer, RawFrame};

    #[test]
    fn decide_only_captures_when_open_and_ready() {
        assert_eq!(decide(ChannelState::Open, true), Action::Capture);
        assert_eq!(decide(ChannelState::Open, false), Action::Wait);
        for state in [ChannelState::Connecting, ChannelState::Closing, ChannelState::Closed] {
            assert_eq!(decide(state, true), Action::Wait);
            assert_eq!(decide(state, false), Action::Wait);
        }
    }

    struct CountingSource {
        ready: AtomicBool,
        counter: std::sync::atomic::AtomicU8,
    }

    impl CountingSource {
        fn new(ready: bool) -> Self {
            Self {
                ready: AtomicBool::new(ready),
                counter: std::sync::atomic::AtomicU8::new(0),
            }
        }
    }

    impl FrameSource for CountingSource {
        fn current_frame(&self) -> Option<RawFrame> {
            if !self.ready.load(Ordering::SeqCst) {
                return None;
            }
            //every read yields a distinct frame, like a moving source
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Some(RawFrame { width: 2, height: 2, pixels: vec![n; 12] })
        }

        fn ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }
    }

    struct PassthroughEncoder;

    impl FrameEncoder for PassthroughEncoder {
        fn encode(&self, source: &dyn FrameSource) -> Result<FrameBuffer, EncodeError> {
            let frame = source.current_frame().ok_or(EncodeError::SourceNotReady)?;
            Ok(FrameBuffer::new(frame.pixels))
        }
    }

    ///Records the channel state observed at every send attempt.
    struct RecordingChannel {
        state: Mutex<ChannelState>,
        sends: Mutex<Vec<(ChannelState, FrameBuffer)>>,
        accept: AtomicBool,
    }

    impl RecordingChannel {
        fn new(state: ChannelState) -> Self {
            Self {
                state: Mutex::new(state),
                sends: Mutex::new(Vec::new()),
                accept: AtomicBool::new(true),
            }
        }
    }

    impl FrameChannel for RecordingChannel {
        fn state(&self) -> ChannelState {
            *self.state.lock().unwrap()
        }

        fn try_send(&self, frame: FrameBuffer) -> bool {
            let state = self.state();
            self.sends.lock().unwrap().push((state, frame));
            self.accept.load(Ordering::SeqCst)
        }

        fn close(&self) {
            *self.state.lock().unwrap() = ChannelState::Closed;
        }
    }

    fn pump_parts(
        ready: bool,
        state: ChannelState,
    ) -> (Arc<RecordingChannel>, FramePump) {
        let channel = Arc::new(RecordingChannel::new(state));
        let pump = FramePump::spawn(
            Box::new(CountingSource::new(ready)),
            channel.clone(),
            Arc::new(PassthroughEncoder),
            Duration::from_millis(50),
        );
        (channel, pump)
    }

    #[tokio::test(start_paused = true)]
    async fn three_ticks_three_distinct_sends() {
        let (channel, pump) = pump_parts(true, ChannelState::Open);
        tokio::time::sleep(Duration::from_millis(120)).await;
        pump.stop().await;

        let sends = channel.sends.lock().unwrap();
        assert_eq!(sends.len(), 3);
        for (state, frame) in sends.iter() {
            assert_eq!(*state, ChannelState::Open);
            assert!(!frame.bytes.is_empty());
        }
        assert_ne!(sends[0].1, sends[1].1);
        assert_ne!(sends[1].1, sends[2].1);
    }

    #[tokio::test(start_paused = true)]
    async fn never_sends_while_not_open() {
        let (channel, pump) = pump_parts(true, ChannelState::Connecting);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(channel.sends.lock().unwrap().is_empty());

        //channel opens late: the pump picks it up without being restarted
        *channel.state.lock().unwrap() = ChannelState::Open;
        tokio::time::sleep(Duration::from_millis(120)).await;
        pump.stop().await;
        assert!(!channel.sends.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_send_does_not_stall_the_next_tick() {
        let (channel, pump) = pump_parts(true, ChannelState::Open);
        channel.accept.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(170)).await;
        pump.stop().await;

        //every tick still attempted a send even though all were dropped
        assert!(channel.sends.lock().unwrap().len() >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn not_ready_source_is_skipped_then_picked_up() {
        let (channel, pump) = pump_parts(false, ChannelState::Open);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(channel.sends.lock().unwrap().is_empty());
        pump.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_observed_before_the_next_step() {
        let (channel, pump) = pump_parts(true, ChannelState::Open);
        tokio::time::sleep(Duration::from_millis(120)).await;
        pump.stop().await;
        let sends_at_stop = channel.sends.lock().unwrap().len();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(channel.sends.lock().unwrap().len(), sends_at_stop);
    }
}
