//! Async ingestion pipeline. Producers push sensor samples through
//! bounded channels with `try_send` and never block; one consumer task
//! owns the `SessionTracker`, which makes it the single serialization
//! point for every analyzer mutation. Stop drains whatever is still
//! queued before sealing the summary.

use log::warn;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::session::SessionTracker;
use crate::types::{
    BaroSample, LocationSample, MotionSample, SessionSummary, TrackerError, TrackerResult,
};

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub location_queue: usize,
    /// Motion arrives at ~60 Hz; give it more headroom.
    pub motion_queue: usize,
    pub baro_queue: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { location_queue: 64, motion_queue: 512, baro_queue: 64 }
    }
}

enum Control {
    Pause(oneshot::Sender<TrackerResult<()>>),
    Resume(oneshot::Sender<TrackerResult<()>>),
    Stop { at: f64, reply: oneshot::Sender<TrackerResult<SessionSummary>> },
}

pub struct PipelineHandle {
    location_tx: mpsc::Sender<LocationSample>,
    motion_tx: mpsc::Sender<MotionSample>,
    baro_tx: mpsc::Sender<BaroSample>,
    control_tx: mpsc::Sender<Control>,
    task: JoinHandle<()>,
}

impl PipelineHandle {
    /// Start the consumer task around an idle tracker.
    pub fn spawn(
        mut tracker: SessionTracker,
        start_ts: f64,
        config: PipelineConfig,
    ) -> TrackerResult<Self> {
        tracker.start(start_ts)?;

        let (location_tx, mut location_rx) = mpsc::channel(config.location_queue);
        let (motion_tx, mut motion_rx) = mpsc::channel(config.motion_queue);
        let (baro_tx, mut baro_rx) = mpsc::channel(config.baro_queue);
        let (control_tx, mut control_rx) = mpsc::channel::<Control>(8);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(sample) = location_rx.recv() => {
                        if let Err(e) = tracker.handle_location(&sample) {
                            warn!("location sample dropped: {}", e);
                        }
                    }
                    Some(sample) = motion_rx.recv() => {
                        if let Err(e) = tracker.handle_motion(&sample) {
                            warn!("motion sample dropped: {}", e);
                        }
                    }
                    Some(sample) = baro_rx.recv() => {
                        if let Err(e) = tracker.handle_baro(&sample) {
                            warn!("baro sample dropped: {}", e);
                        }
                    }
                    control = control_rx.recv() => match control {
                        Some(Control::Pause(reply)) => {
                            let _ = reply.send(tracker.pause());
                        }
                        Some(Control::Resume(reply)) => {
                            let _ = reply.send(tracker.resume());
                        }
                        Some(Control::Stop { at, reply }) => {
                            // Everything already queued still belongs to
                            // the session.
                            while let Ok(s) = location_rx.try_recv() {
                                let _ = tracker.handle_location(&s);
                            }
                            while let Ok(s) = motion_rx.try_recv() {
                                let _ = tracker.handle_motion(&s);
                            }
                            while let Ok(s) = baro_rx.try_recv() {
                                let _ = tracker.handle_baro(&s);
                            }
                            let _ = reply.send(tracker.stop(at));
                            break;
                        }
                        None => break,
                    },
                    else => break,
                }
            }
        });

        Ok(Self { location_tx, motion_tx, baro_tx, control_tx, task })
    }

    /// Non-blocking. A full queue drops the sample; a closed channel
    /// means the consumer is gone.
    pub fn send_location(&self, sample: LocationSample) -> TrackerResult<()> {
        match self.location_tx.try_send(sample) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("location queue full, sample dropped");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TrackerError::ChannelClosed),
        }
    }

    pub fn send_motion(&self, sample: MotionSample) -> TrackerResult<()> {
        match self.motion_tx.try_send(sample) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TrackerError::ChannelClosed),
        }
    }

    pub fn send_baro(&self, sample: BaroSample) -> TrackerResult<()> {
        match self.baro_tx.try_send(sample) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("baro queue full, sample dropped");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TrackerError::ChannelClosed),
        }
    }

    pub async fn pause(&self) -> TrackerResult<()> {
        let (tx, rx) = oneshot::channel();
        self.control_tx
            .send(Control::Pause(tx))
            .await
            .map_err(|_| TrackerError::ChannelClosed)?;
        rx.await.map_err(|_| TrackerError::ChannelClosed)?
    }

    pub async fn resume(&self) -> TrackerResult<()> {
        let (tx, rx) = oneshot::channel();
        self.control_tx
            .send(Control::Resume(tx))
            .await
            .map_err(|_| TrackerError::ChannelClosed)?;
        rx.await.map_err(|_| TrackerError::ChannelClosed)?
    }

    /// Stop the session, draining queued samples first, and wait for the
    /// consumer to retire.
    pub async fn stop(self, at: f64) -> TrackerResult<SessionSummary> {
        let (tx, rx) = oneshot::channel();
        self.control_tx
            .send(Control::Stop { at, reply: tx })
            .await
            .map_err(|_| TrackerError::ChannelClosed)?;
        let summary = rx.await.map_err(|_| TrackerError::ChannelClosed)?;
        let _ = self.task.await;
        summary
    }
}
