//! Live-view (EVF) stream controller.
//!
//! `Inactive → Starting → Active → Stopping → Inactive`. The controller is owned
//! by the dispatch worker, so start and stop requests are already serialized;
//! callers read its state through [`LiveViewSnapshot`]s published on a watch
//! channel after every change.
//!
//! Frames are pulled, one native acquire/copy/release cycle per
//! [`LiveViewController::download_frame`] call.

use crate::command::{CancelToken, LensDrive, LiveViewFrame, Operation};
use crate::error::{EngineError, EngineResult};
use crate::hardware::{PropertyId, PropertyValue};
use crate::session::{SessionManager, SessionState};
use edsdk_sys as sys;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Live-view lifecycle. Frames, zoom and AF need `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveViewState {
    /// Camera output not routed to the host
    Inactive,
    /// Enabling EVF output
    Starting,
    /// Frames can be downloaded.
    Active,
    /// Disabling EVF output
    Stopping,
}

impl fmt::Display for LiveViewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LiveViewState::Inactive => "inactive",
            LiveViewState::Starting => "starting",
            LiveViewState::Active => "active",
            LiveViewState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// EVF magnification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zoom {
    /// Whole frame
    Fit,
    /// 5x
    X5,
    /// 10x
    X10,
}

impl Zoom {
    /// Parse a magnification factor (1, 5 or 10).
    pub fn from_level(level: u32) -> EngineResult<Self> {
        match level {
            sys::kEdsEvfZoom_Fit => Ok(Zoom::Fit),
            sys::kEdsEvfZoom_x5 => Ok(Zoom::X5),
            sys::kEdsEvfZoom_x10 => Ok(Zoom::X10),
            other => Err(EngineError::InvalidArgument(format!(
                "zoom level must be 1, 5 or 10, got {other}"
            ))),
        }
    }

    /// Value for `kEdsPropID_Evf_Zoom`.
    pub fn level(self) -> u32 {
        match self {
            Zoom::Fit => sys::kEdsEvfZoom_Fit,
            Zoom::X5 => sys::kEdsEvfZoom_x5,
            Zoom::X10 => sys::kEdsEvfZoom_x10,
        }
    }
}

/// Worker-owned live-view state as seen from callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveViewSnapshot {
    /// Lifecycle state
    pub state: LiveViewState,
    /// Current magnification
    pub zoom: Zoom,
    /// Top-left corner of the zoomed region
    pub zoom_position: (i32, i32),
    /// Pacing for frame pumps, `1 / fps`.
    pub frame_interval: Duration,
    /// Frames downloaded since live view last started.
    pub frames: u64,
}

/// Shortest pacing interval a frame pump will use.
pub const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(1);
/// Longest pacing interval a frame pump will use.
pub const MAX_FRAME_INTERVAL: Duration = Duration::from_secs(3600);

/// Convert a requested frame rate into a pacing interval. Non-positive rates fall
/// back to one frame per second; the result is clamped to
/// [`MIN_FRAME_INTERVAL`]`..=`[`MAX_FRAME_INTERVAL`].
pub fn frame_interval_for(fps: f64) -> Duration {
    let fps = if fps.is_finite() && fps > 0.0 { fps } else { 1.0 };
    let secs = 1.0 / fps;
    if secs <= MIN_FRAME_INTERVAL.as_secs_f64() {
        MIN_FRAME_INTERVAL
    } else if secs >= MAX_FRAME_INTERVAL.as_secs_f64() {
        MAX_FRAME_INTERVAL
    } else {
        Duration::from_secs_f64(secs)
    }
}

/// Live-view state machine, owned by the dispatch worker.
pub struct LiveViewController {
    state: LiveViewState,
    zoom: Zoom,
    zoom_position: (i32, i32),
    frame_interval: Duration,
    frames: u64,
    snapshot_tx: watch::Sender<LiveViewSnapshot>,
}

impl LiveViewController {
    /// Inactive, at `Fit`, pacing frame pumps at `frame_interval`.
    pub fn new(frame_interval: Duration) -> Self {
        let initial = LiveViewSnapshot {
            state: LiveViewState::Inactive,
            zoom: Zoom::Fit,
            zoom_position: (0, 0),
            frame_interval,
            frames: 0,
        };
        let (snapshot_tx, _) = watch::channel(initial);
        Self {
            state: LiveViewState::Inactive,
            zoom: Zoom::Fit,
            zoom_position: (0, 0),
            frame_interval,
            frames: 0,
            snapshot_tx,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LiveViewState {
        self.state
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> LiveViewSnapshot {
        LiveViewSnapshot {
            state: self.state,
            zoom: self.zoom,
            zoom_position: self.zoom_position,
            frame_interval: self.frame_interval,
            frames: self.frames,
        }
    }

    /// Receiver of every published snapshot.
    pub fn watch(&self) -> watch::Receiver<LiveViewSnapshot> {
        self.snapshot_tx.subscribe()
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn transition(&mut self, next: LiveViewState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "Live view state");
            self.state = next;
        }
        self.publish();
    }

    pub(crate) fn require_active(&self) -> EngineResult<()> {
        if self.state == LiveViewState::Active {
            Ok(())
        } else {
            Err(EngineError::LiveViewNotActive)
        }
    }

    /// Route EVF output to the host. A no-op when already started.
    pub fn start(&mut self, session: &SessionManager, cancel: &CancelToken) -> EngineResult<()> {
        if matches!(self.state, LiveViewState::Active | LiveViewState::Starting) {
            debug!("Live view already running");
            return Ok(());
        }
        if session.state() != SessionState::Open {
            return Err(EngineError::SessionNotOpen);
        }

        self.transition(LiveViewState::Starting);
        match session.run(Operation::StartEvf, cancel) {
            Ok(_) => {
                self.frames = 0;
                self.transition(LiveViewState::Active);
                info!("Live view started");
                Ok(())
            }
            Err(e) => {
                self.transition(LiveViewState::Inactive);
                Err(e)
            }
        }
    }

    /// Return EVF output to the camera. On failure live view stays active.
    pub fn stop(&mut self, session: &SessionManager, cancel: &CancelToken) -> EngineResult<()> {
        if self.state == LiveViewState::Inactive {
            return Ok(());
        }

        self.transition(LiveViewState::Stopping);
        match session.run(Operation::EndEvf, cancel) {
            Ok(_) => {
                self.transition(LiveViewState::Inactive);
                info!(frames = self.frames, "Live view stopped");
                Ok(())
            }
            Err(e) => {
                warn!("Failed to stop live view: {}", e);
                self.transition(LiveViewState::Active);
                Err(e)
            }
        }
    }

    /// Stop as part of tearing the session down; always ends `Inactive`.
    pub fn force_stop(&mut self, session: &SessionManager) {
        if self.state == LiveViewState::Inactive {
            return;
        }
        self.transition(LiveViewState::Stopping);
        if let Err(e) = session.run(Operation::EndEvf, &CancelToken::new()) {
            warn!("Failed to stop live view during disconnect: {}", e);
        }
        self.transition(LiveViewState::Inactive);
    }

    /// Forget all state without touching the device (device already gone).
    pub fn reset(&mut self) {
        self.zoom = Zoom::Fit;
        self.zoom_position = (0, 0);
        self.frames = 0;
        self.transition(LiveViewState::Inactive);
    }

    /// Copy one frame out of the camera. Needs `Active`.
    pub fn download_frame(
        &mut self,
        session: &SessionManager,
        cancel: &CancelToken,
    ) -> EngineResult<LiveViewFrame> {
        self.require_active()?;
        let mut frame = session
            .run(Operation::DownloadEvf, cancel)?
            .into_frame()
            .ok_or_else(|| EngineError::TransferFailed("no frame in EVF download".into()))?;
        self.frames += 1;
        frame.sequence = self.frames;
        self.publish();
        Ok(frame)
    }

    /// Set the magnification. Needs `Active`.
    pub fn set_zoom(
        &mut self,
        session: &SessionManager,
        zoom: Zoom,
        cancel: &CancelToken,
    ) -> EngineResult<()> {
        self.require_active()?;
        session.run(
            Operation::SetProperty {
                property: PropertyId::EVF_ZOOM,
                param: 0,
                value: PropertyValue::UInt32(zoom.level()),
            },
            cancel,
        )?;
        self.zoom = zoom;
        self.publish();
        Ok(())
    }

    /// Move the zoomed region. Needs `Active`.
    pub fn set_zoom_position(
        &mut self,
        session: &SessionManager,
        x: i32,
        y: i32,
        cancel: &CancelToken,
    ) -> EngineResult<()> {
        self.require_active()?;
        session.run(
            Operation::SetProperty {
                property: PropertyId::EVF_ZOOM_POSITION,
                param: 0,
                value: PropertyValue::Point { x, y },
            },
            cancel,
        )?;
        self.zoom_position = (x, y);
        self.publish();
        Ok(())
    }

    /// Move the focus frame to `(x, y)` and run a single AF pass there.
    pub fn autofocus_at(
        &mut self,
        session: &SessionManager,
        x: i32,
        y: i32,
        cancel: &CancelToken,
    ) -> EngineResult<()> {
        self.set_zoom_position(session, x, y, cancel)?;
        session.run(Operation::DoEvfAf(true), cancel)?;
        session.run(Operation::DoEvfAf(false), cancel)?;
        Ok(())
    }

    /// Step the focus motor. Needs `Active`.
    pub fn drive_lens(
        &mut self,
        session: &SessionManager,
        drive: LensDrive,
        cancel: &CancelToken,
    ) -> EngineResult<()> {
        self.require_active()?;
        session.run(Operation::DriveLens(drive), cancel).map(|_| ())
    }

    /// Write the EVF AF mode property. Allowed whenever the session is open.
    pub fn set_af_mode(
        &mut self,
        session: &SessionManager,
        mode: u32,
        cancel: &CancelToken,
    ) -> EngineResult<()> {
        session
            .run(
                Operation::SetProperty {
                    property: PropertyId::EVF_AF_MODE,
                    param: 0,
                    value: PropertyValue::UInt32(mode),
                },
                cancel,
            )
            .map(|_| ())
    }

    /// Change frame pump pacing; see [`frame_interval_for`].
    pub fn set_frame_rate(&mut self, fps: f64) {
        self.frame_interval = frame_interval_for(fps);
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_recovery::{Backoff, RetryPolicies, RetryPolicy};
    use crate::events::EventDispatcher;
    use crate::hardware::mock::{MockSdk, SdkCall, SdkOp};
    use crate::hardware::HandleRegistry;
    use crate::session::SessionSettings;
    use std::sync::Arc;

    fn open(sdk: Arc<MockSdk>) -> (SessionManager, LiveViewController) {
        let registry = HandleRegistry::new(sdk.clone());
        let dispatcher = EventDispatcher::new(sdk.clone(), registry.clone());
        let policies = RetryPolicies::new().with_base(
            RetryPolicy::default().with_backoff(Backoff::fixed(Duration::from_millis(1))),
        );
        let mut session = SessionManager::new(
            sdk.clone(),
            registry,
            dispatcher,
            policies,
            SessionSettings::default(),
        );
        session.connect(None, &CancelToken::new()).unwrap();
        sdk.clear_calls();
        (session, LiveViewController::new(Duration::from_millis(100)))
    }

    #[test]
    fn test_download_frame_inactive_makes_no_call() {
        let sdk = Arc::new(MockSdk::new());
        let (session, mut live_view) = open(sdk.clone());

        let err = live_view
            .download_frame(&session, &CancelToken::new())
            .unwrap_err();

        assert!(matches!(err, EngineError::LiveViewNotActive));
        assert!(sdk.calls().is_empty());
    }

    #[test]
    fn test_start_is_idempotent() {
        let sdk = Arc::new(MockSdk::new());
        let (session, mut live_view) = open(sdk.clone());
        let cancel = CancelToken::new();

        live_view.start(&session, &cancel).unwrap();
        live_view.start(&session, &cancel).unwrap();

        assert_eq!(live_view.state(), LiveViewState::Active);
        assert_eq!(
            sdk.calls(),
            vec![SdkCall::SetProperty(
                PropertyId::EVF_OUTPUT_DEVICE,
                PropertyValue::UInt32(sys::kEdsEvfOutputDevice_PC)
            )]
        );
    }

    #[test]
    fn test_frames_are_sequenced_and_released() {
        let sdk = Arc::new(MockSdk::new());
        let (session, mut live_view) = open(sdk.clone());
        let cancel = CancelToken::new();
        live_view.start(&session, &cancel).unwrap();

        let first = live_view.download_frame(&session, &cancel).unwrap();
        let second = live_view.download_frame(&session, &cancel).unwrap();

        assert_eq!((first.sequence, second.sequence), (1, 2));
        assert_ne!(first.data, second.data);
        assert!(sdk.outstanding_objects().is_empty());
        assert_eq!(live_view.snapshot().frames, 2);
    }

    #[test]
    fn test_stop_failure_keeps_active() {
        let sdk = Arc::new(MockSdk::new());
        let (session, mut live_view) = open(sdk.clone());
        let cancel = CancelToken::new();
        live_view.start(&session, &cancel).unwrap();
        sdk.fail_next(SdkOp::SetProperty, sys::EDS_ERR_COMM_DISCONNECTED, 1);

        assert!(live_view.stop(&session, &cancel).is_err());
        assert_eq!(live_view.state(), LiveViewState::Active);

        live_view.stop(&session, &cancel).unwrap();
        assert_eq!(live_view.state(), LiveViewState::Inactive);
    }

    #[test]
    fn test_zoom_requires_active_and_valid_level() {
        let sdk = Arc::new(MockSdk::new());
        let (session, mut live_view) = open(sdk.clone());
        let cancel = CancelToken::new();

        assert!(matches!(
            live_view.set_zoom(&session, Zoom::X5, &cancel),
            Err(EngineError::LiveViewNotActive)
        ));
        assert!(sdk.calls().is_empty());
        assert!(Zoom::from_level(3).is_err());

        live_view.start(&session, &cancel).unwrap();
        live_view.set_zoom(&session, Zoom::X10, &cancel).unwrap();
        assert_eq!(
            sdk.property_value(PropertyId::EVF_ZOOM),
            Some(PropertyValue::UInt32(10))
        );
        assert_eq!(live_view.snapshot().zoom, Zoom::X10);
    }

    #[test]
    fn test_autofocus_sets_position_then_runs_af() {
        let sdk = Arc::new(MockSdk::new());
        let (session, mut live_view) = open(sdk.clone());
        let cancel = CancelToken::new();
        live_view.start(&session, &cancel).unwrap();
        sdk.clear_calls();

        live_view.autofocus_at(&session, 100, 200, &cancel).unwrap();

        assert_eq!(
            sdk.calls(),
            vec![
                SdkCall::SetProperty(
                    PropertyId::EVF_ZOOM_POSITION,
                    PropertyValue::Point { x: 100, y: 200 }
                ),
                SdkCall::SendCommand {
                    command: sys::kEdsCameraCommand_DoEvfAf,
                    param: sys::kEdsCameraCommand_EvfAf_ON
                },
                SdkCall::SendCommand {
                    command: sys::kEdsCameraCommand_DoEvfAf,
                    param: sys::kEdsCameraCommand_EvfAf_OFF
                },
            ]
        );
        assert_eq!(live_view.snapshot().zoom_position, (100, 200));
    }

    #[test]
    fn test_frame_rate_coerces_non_positive() {
        assert_eq!(frame_interval_for(4.0), Duration::from_millis(250));
        assert_eq!(frame_interval_for(0.0), Duration::from_secs(1));
        assert_eq!(frame_interval_for(-4.0), Duration::from_secs(1));
        assert_eq!(frame_interval_for(f64::NAN), Duration::from_secs(1));
    }

    #[test]
    fn test_extreme_frame_rates_are_clamped() {
        assert_eq!(frame_interval_for(1e-30), MAX_FRAME_INTERVAL);
        assert_eq!(frame_interval_for(f64::MIN_POSITIVE), MAX_FRAME_INTERVAL);
        assert_eq!(frame_interval_for(1e12), MIN_FRAME_INTERVAL);
        assert_eq!(frame_interval_for(f64::MAX), MIN_FRAME_INTERVAL);

        let mut controller = LiveViewController::new(Duration::from_millis(100));
        controller.set_frame_rate(1e12);
        assert!(controller.snapshot().frame_interval > Duration::ZERO);
    }
}
