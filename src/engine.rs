//! Public engine handle.
//!
//! [`Engine`] is a cheap, cloneable handle onto one dispatch worker. Every device
//! operation is a request on the worker's queue; the async methods here enqueue it
//! and wait for the result, bounded by `dispatch.command_timeout_ms`.
//!
//! ```no_run
//! use eos_tether::config::EngineConfig;
//! use eos_tether::engine::Engine;
//! use eos_tether::hardware::mock::MockSdk;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> eos_tether::error::EngineResult<()> {
//! let engine = Engine::new(Arc::new(MockSdk::new()), EngineConfig::default())?;
//! engine.connect(None).await?;
//! let image = engine.capture(Duration::from_secs(10)).await?;
//! println!("{}: {} bytes", image.file_name, image.data.len());
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use crate::command::{
    CancelToken, Command, LensDrive, LiveViewFrame, Operation, ShutterButton, Value,
};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::error_recovery::RetryPolicies;
use crate::events::{
    CameraEventListener, CaptureListener, CapturedImage, EventDispatcher, EventKind,
    SubscriptionId,
};
use crate::hardware::{
    CameraInfo, CameraSdk, DeviceHandle, HandleRegistry, PropertyId, PropertyValue, SdkLifetime,
};
use crate::live_view::{LiveViewController, LiveViewSnapshot, Zoom};
use crate::properties::ExposureSettings;
use crate::queue::{DispatchWorker, QueueHandle, Reply, Request};
use crate::session::{SessionManager, SessionState};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle as TaskHandle;
use tracing::{debug, info, warn};

struct Shared {
    dispatcher: Arc<EventDispatcher>,
    policies: RetryPolicies,
    session_state: watch::Receiver<SessionState>,
    live_view: watch::Receiver<LiveViewSnapshot>,
    worker: Mutex<Option<JoinHandle<()>>>,
    error_backoff: Duration,
}

/// Handle to a running tether engine.
#[derive(Clone)]
pub struct Engine {
    queue: QueueHandle,
    shared: Arc<Shared>,
}

impl Engine {
    /// Start an engine with its own SDK lifetime.
    pub fn new(sdk: Arc<dyn CameraSdk>, config: EngineConfig) -> EngineResult<Self> {
        Self::with_lifetime(sdk, config, SdkLifetime::new())
    }

    /// Start an engine against the real EDSDK, sharing the process-wide SDK lifetime.
    #[cfg(feature = "edsdk_hardware")]
    pub fn edsdk(config: EngineConfig) -> EngineResult<Self> {
        let sdk: Arc<dyn CameraSdk> = Arc::new(crate::hardware::edsdk::EdsSdk::new());
        Self::with_lifetime(sdk, config, SdkLifetime::shared_edsdk())
    }

    /// Start an engine whose SDK initialization is counted against `lifetime`.
    pub fn with_lifetime(
        sdk: Arc<dyn CameraSdk>,
        config: EngineConfig,
        lifetime: Arc<SdkLifetime>,
    ) -> EngineResult<Self> {
        config
            .validate()
            .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;
        let lease = lifetime.acquire(sdk.clone())?;

        let registry = HandleRegistry::new(sdk.clone());
        let dispatcher = EventDispatcher::new(sdk.clone(), registry.clone());
        let policies = config.retry_policies();
        let session = SessionManager::new(
            sdk.clone(),
            registry,
            dispatcher.clone(),
            policies.clone(),
            config.session_settings(),
        );
        let live_view = LiveViewController::new(config.frame_interval());
        let session_state = session.watch_state();
        let live_view_state = live_view.watch();

        let (tx, rx) = mpsc::channel(config.dispatch.queue_capacity);
        let worker = DispatchWorker::new(
            sdk,
            session,
            live_view,
            dispatcher.clone(),
            config.event_pump_interval(),
            lease,
        );
        let handle = std::thread::Builder::new()
            .name("tether-dispatch".to_string())
            .spawn(move || worker.run(rx))
            .map_err(|e| {
                EngineError::InvalidArgument(format!("failed to spawn dispatch worker: {e}"))
            })?;

        info!("Tether engine started");
        Ok(Self {
            queue: QueueHandle::new(tx, config.command_timeout()),
            shared: Arc::new(Shared {
                dispatcher,
                policies,
                session_state,
                live_view: live_view_state,
                worker: Mutex::new(Some(handle)),
                error_backoff: config.live_view_error_backoff(),
            }),
        })
    }

    // ------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------

    /// Cameras currently attached.
    pub async fn list_cameras(&self) -> EngineResult<Vec<CameraInfo>> {
        match self.queue.call(Request::ListCameras).await? {
            Reply::Cameras(cameras) => Ok(cameras),
            other => Err(unexpected(other)),
        }
    }

    /// Open a session with `device`, or with the first camera found when `None`.
    ///
    /// Rejected with `InvalidSessionState` without touching the device while a
    /// session is opening, open, or closing.
    pub async fn connect(&self, device: Option<DeviceHandle>) -> EngineResult<DeviceHandle> {
        let state = self.session_state();
        if state != SessionState::Closed {
            return Err(EngineError::InvalidSessionState {
                expected: SessionState::Closed.as_str(),
                found: state.as_str(),
            });
        }
        match self.queue.call(Request::Connect(device)).await? {
            Reply::Connected(device) => Ok(device),
            other => Err(unexpected(other)),
        }
    }

    /// Stop live view if needed and close the session. Always leaves the session
    /// `Closed`; the close failure, if any, is still returned.
    pub async fn disconnect(&self) -> EngineResult<()> {
        self.call_unit(Request::Disconnect).await
    }

    /// Current session state.
    pub fn session_state(&self) -> SessionState {
        *self.shared.session_state.borrow()
    }

    /// Receiver that sees every session state change.
    pub fn watch_session(&self) -> watch::Receiver<SessionState> {
        self.shared.session_state.clone()
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// A command carrying the configured retry policy for its kind.
    pub fn command(&self, op: Operation) -> Command {
        let policy = self.shared.policies.for_kind(op.kind());
        Command::new(op).with_policy(policy)
    }

    /// Run `command` and wait for its value.
    pub async fn execute(&self, command: Command) -> EngineResult<Value> {
        self.submit(command).await?.wait().await
    }

    /// Queue `command` and return a ticket to cancel or await it.
    pub async fn submit(&self, command: Command) -> EngineResult<CommandTicket> {
        let cancel = command.cancel_token();
        let rx = self
            .queue
            .enqueue(Request::Execute(command), cancel.clone())
            .await?;
        Ok(CommandTicket {
            queue: self.queue.clone(),
            cancel,
            rx,
        })
    }

    async fn run(&self, op: Operation) -> EngineResult<Value> {
        self.execute(self.command(op)).await
    }

    async fn call_unit(&self, request: Request) -> EngineResult<()> {
        match self.queue.call(request).await? {
            Reply::Unit => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    // ------------------------------------------------------------------
    // Properties and shutter
    // ------------------------------------------------------------------

    /// Read a property of the open session's camera.
    pub async fn get_property(&self, property: PropertyId) -> EngineResult<PropertyValue> {
        self.run(Operation::GetProperty { property, param: 0 })
            .await?
            .into_property()
            .ok_or_else(|| EngineError::InvalidArgument(format!("no value for {property}")))
    }

    /// Write a property of the open session's camera.
    pub async fn set_property(&self, property: PropertyId, value: PropertyValue) -> EngineResult<()> {
        self.run(Operation::SetProperty {
            property,
            param: 0,
            value,
        })
        .await
        .map(|_| ())
    }

    /// Values the camera currently accepts for `property`.
    pub async fn property_desc(&self, property: PropertyId) -> EngineResult<Vec<i32>> {
        Ok(self
            .run(Operation::GetPropertyDesc(property))
            .await?
            .into_property_desc()
            .unwrap_or_default())
    }

    /// Read every exposure property. Properties the camera does not expose in its
    /// current mode come back as `None`.
    pub async fn read_exposure_settings(&self) -> EngineResult<ExposureSettings> {
        let mut settings = ExposureSettings::default();
        for property in ExposureSettings::PROPERTIES {
            let read = self.get_property(property).await;
            settings.apply(property, read)?;
        }
        Ok(settings)
    }

    /// Shoot a still. The image arrives as an `ObjectAdded` event; see
    /// [`Engine::capture`] to wait for it.
    pub async fn take_picture(&self) -> EngineResult<()> {
        self.run(Operation::TakePicture).await.map(|_| ())
    }

    /// Move the shutter button.
    pub async fn press_shutter(&self, button: ShutterButton) -> EngineResult<()> {
        self.run(Operation::PressShutter(button)).await.map(|_| ())
    }

    /// Take a picture and wait for the camera to hand over the file.
    pub async fn capture(&self, timeout: Duration) -> EngineResult<CapturedImage> {
        let (listener, mut images) = CaptureListener::new();
        let id = self.subscribe(EventKind::ObjectAdded, Arc::new(listener));
        let result = async {
            self.take_picture().await?;
            match tokio::time::timeout(timeout, images.recv()).await {
                Ok(Some(Ok(image))) => Ok(image),
                Ok(Some(Err(reason))) => Err(EngineError::TransferFailed(reason)),
                Ok(None) => Err(EngineError::DispatcherClosed),
                Err(_) => Err(EngineError::Timeout(timeout)),
            }
        }
        .await;
        self.unsubscribe(id);
        result
    }

    // ------------------------------------------------------------------
    // Live view
    // ------------------------------------------------------------------

    /// Route live view to the host. Idempotent.
    pub async fn start_live_view(&self) -> EngineResult<()> {
        self.call_unit(Request::StartLiveView).await
    }

    /// Stop live view. Idempotent.
    pub async fn stop_live_view(&self) -> EngineResult<()> {
        self.call_unit(Request::StopLiveView).await
    }

    /// Copy one frame. Live view must be active.
    pub async fn download_frame(&self) -> EngineResult<LiveViewFrame> {
        match self.queue.call(Request::DownloadFrame).await? {
            Reply::Frame(frame) => Ok(frame),
            other => Err(unexpected(other)),
        }
    }

    /// Set the live-view zoom ratio.
    pub async fn set_zoom(&self, zoom: Zoom) -> EngineResult<()> {
        self.call_unit(Request::SetZoom(zoom)).await
    }

    /// Move the zoomed region's top-left corner.
    pub async fn set_zoom_position(&self, x: i32, y: i32) -> EngineResult<()> {
        self.call_unit(Request::SetZoomPosition { x, y }).await
    }

    /// Focus on the point `(x, y)` of the live-view image.
    pub async fn autofocus_at(&self, x: i32, y: i32) -> EngineResult<()> {
        self.call_unit(Request::AutofocusAt { x, y }).await
    }

    /// Step the focus motor. A busy camera is not retried once the step may
    /// have been applied.
    pub async fn drive_lens(&self, drive: LensDrive) -> EngineResult<()> {
        self.call_unit(Request::DriveLens(drive)).await
    }

    /// Set `kEdsPropID_Evf_AFMode`.
    pub async fn set_evf_af_mode(&self, mode: u32) -> EngineResult<()> {
        self.call_unit(Request::SetAfMode(mode)).await
    }

    /// Latest live-view snapshot.
    pub fn live_view(&self) -> LiveViewSnapshot {
        self.shared.live_view.borrow().clone()
    }

    /// Receiver that sees every live-view change.
    pub fn watch_live_view(&self) -> watch::Receiver<LiveViewSnapshot> {
        self.shared.live_view.clone()
    }

    /// Start live view if needed and pull frames at `fps` until the guard is
    /// dropped or live view stops. Failed downloads pause the pump for
    /// `live_view.error_backoff_ms`.
    pub async fn stream_frames(
        &self,
        fps: f64,
    ) -> EngineResult<(mpsc::Receiver<LiveViewFrame>, FramePumpGuard)> {
        self.call_unit(Request::SetFrameRate(fps)).await?;
        self.start_live_view().await?;

        let interval = self.live_view().frame_interval;
        let (tx, rx) = mpsc::channel(8);
        let engine = self.clone();
        let task = tokio::spawn(async move { engine.pump_frames(interval, tx).await });
        Ok((rx, FramePumpGuard { task }))
    }

    async fn pump_frames(self, interval: Duration, tx: mpsc::Sender<LiveViewFrame>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.download_frame().await {
                Ok(frame) => {
                    if tx.send(frame).await.is_err() {
                        debug!("Frame receiver dropped");
                        break;
                    }
                }
                Err(EngineError::LiveViewNotActive) | Err(EngineError::DispatcherClosed) => break,
                Err(e) => {
                    warn!("Live view frame failed: {}", e);
                    tokio::time::sleep(self.shared.error_backoff).await;
                }
            }
        }
        debug!("Frame pump stopped");
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Listeners are called on the SDK callback context and must not block.
    pub fn subscribe(
        &self,
        kind: EventKind,
        listener: Arc<dyn CameraEventListener>,
    ) -> SubscriptionId {
        self.shared.dispatcher.subscribe(kind, listener)
    }

    /// Register `listener` for every event kind.
    pub fn subscribe_all(&self, listener: Arc<dyn CameraEventListener>) -> SubscriptionId {
        self.shared.dispatcher.subscribe_all(listener)
    }

    /// Returns whether `id` was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.dispatcher.unsubscribe(id)
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Close any open session, release the SDK and join the worker. Other handles
    /// fail with `DispatcherClosed` afterwards.
    pub async fn shutdown(&self) -> EngineResult<()> {
        let result = match self.queue.call(Request::Shutdown).await {
            Ok(_) | Err(EngineError::DispatcherClosed) => Ok(()),
            Err(e) => Err(e),
        };
        let worker = self.shared.worker.lock().take();
        if let Some(worker) = worker {
            let joined = tokio::task::spawn_blocking(move || worker.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                warn!("Dispatch worker did not exit cleanly");
            }
        }
        info!("Tether engine stopped");
        result
    }
}

fn unexpected(reply: Reply) -> EngineError {
    EngineError::InvalidArgument(format!("unexpected reply from dispatch worker: {reply:?}"))
}

/// A queued command.
pub struct CommandTicket {
    queue: QueueHandle,
    cancel: CancelToken,
    rx: oneshot::Receiver<EngineResult<Reply>>,
}

impl CommandTicket {
    /// Cancel before the first attempt, or at the next retry boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A clone of the ticket's token.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Wait for completion, bounded by the command timeout.
    pub async fn wait(self) -> EngineResult<Value> {
        let timeout = self.queue.timeout();
        match self.queue.wait(self.rx, &self.cancel, timeout).await? {
            Reply::Value(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }
}

/// Keeps a frame pump running; dropping it stops the pump. Live view itself stays
/// on until stopped.
pub struct FramePumpGuard {
    task: TaskHandle<()>,
}

impl FramePumpGuard {
    /// Whether the pump task is still pulling frames.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for FramePumpGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("session", &self.session_state())
            .field("live_view", &self.live_view().state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockSdk, SdkOp};
    use edsdk_sys as sys;

    fn fast_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.retry.backoff_ms = 2;
        config.dispatch.command_timeout_ms = 2_000;
        config.dispatch.event_pump_interval_ms = 5;
        config
    }

    #[tokio::test]
    async fn test_engine_lifecycle() {
        let sdk = Arc::new(MockSdk::new());
        let engine = Engine::new(sdk.clone(), fast_config()).unwrap();
        assert!(sdk.is_initialized());

        engine.connect(None).await.unwrap();
        assert_eq!(engine.session_state(), SessionState::Open);

        engine.shutdown().await.unwrap();
        assert!(!sdk.is_session_open(DeviceHandle(1)));
        assert!(!sdk.is_initialized());
        assert!(matches!(
            engine.list_cameras().await,
            Err(EngineError::DispatcherClosed)
        ));
    }

    #[tokio::test]
    async fn test_commands_complete_in_submission_order() {
        let sdk = Arc::new(MockSdk::new());
        let engine = Engine::new(sdk.clone(), fast_config()).unwrap();
        engine.connect(None).await.unwrap();
        sdk.set_latency(SdkOp::SetProperty, Duration::from_millis(20));

        let first = engine
            .submit(engine.command(Operation::SetProperty {
                property: PropertyId::ISO_SPEED,
                param: 0,
                value: PropertyValue::UInt32(0x50),
            }))
            .await
            .unwrap();
        let second = engine
            .submit(engine.command(Operation::GetProperty {
                property: PropertyId::ISO_SPEED,
                param: 0,
            }))
            .await
            .unwrap();

        first.wait().await.unwrap();
        let value = second.wait().await.unwrap().into_property();
        assert_eq!(value, Some(PropertyValue::UInt32(0x50)));
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_ticket_cancel_during_retries() {
        let sdk = Arc::new(MockSdk::new());
        let mut config = fast_config();
        config.retry.backoff_ms = 1_000;
        let engine = Engine::new(sdk.clone(), config).unwrap();
        engine.connect(None).await.unwrap();
        sdk.fail_next(SdkOp::SendCommand, sys::EDS_ERR_DEVICE_BUSY, 10);

        let ticket = engine
            .submit(engine.command(Operation::TakePicture))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        ticket.cancel();

        assert!(matches!(ticket.wait().await, Err(EngineError::Cancelled)));
        assert_eq!(sdk.call_count(SdkOp::SendCommand), 1);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_rejects_session_operations() {
        let sdk = Arc::new(MockSdk::new());
        let engine = Engine::new(sdk.clone(), fast_config()).unwrap();

        let err = engine
            .execute(Command::new(Operation::OpenSession))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
        assert_eq!(sdk.call_count(SdkOp::OpenSession), 0);
        engine.shutdown().await.unwrap();
    }
}
