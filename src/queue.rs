//! Command queue and dispatch worker.
//!
//! Every device operation is serialized through one worker thread that owns the
//! session, the live-view controller, and the SDK lease. Callers enqueue a [`Job`]
//! on a bounded channel and wait on a oneshot for its result; jobs complete in
//! submission order and never interleave. While idle the worker pumps native events
//! so that SDK callbacks are delivered.

use crate::command::{CancelToken, Command, LensDrive, LiveViewFrame, Operation, Value};
use crate::error::{EngineError, EngineResult};
use crate::events::{EventDispatcher, EventKind, FnListener, SubscriptionId};
use crate::hardware::{CameraInfo, CameraSdk, DeviceHandle, SdkLease};
use crate::live_view::{LiveViewController, Zoom};
use crate::session::{SessionManager, SessionState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

/// Work the dispatch worker knows how to do.
#[derive(Debug)]
pub(crate) enum Request {
    ListCameras,
    Connect(Option<DeviceHandle>),
    Disconnect,
    Execute(Command),
    StartLiveView,
    StopLiveView,
    DownloadFrame,
    SetZoom(Zoom),
    SetZoomPosition { x: i32, y: i32 },
    AutofocusAt { x: i32, y: i32 },
    DriveLens(LensDrive),
    SetAfMode(u32),
    SetFrameRate(f64),
    Shutdown,
}

impl Request {
    fn name(&self) -> &'static str {
        match self {
            Request::ListCameras => "list_cameras",
            Request::Connect(_) => "connect",
            Request::Disconnect => "disconnect",
            Request::Execute(command) => command.kind().as_str(),
            Request::StartLiveView => "start_live_view",
            Request::StopLiveView => "stop_live_view",
            Request::DownloadFrame => "download_frame",
            Request::SetZoom(_) => "set_zoom",
            Request::SetZoomPosition { .. } => "set_zoom_position",
            Request::AutofocusAt { .. } => "autofocus_at",
            Request::DriveLens(_) => "drive_lens",
            Request::SetAfMode(_) => "set_af_mode",
            Request::SetFrameRate(_) => "set_frame_rate",
            Request::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug)]
pub(crate) enum Reply {
    Unit,
    Cameras(Vec<CameraInfo>),
    Connected(DeviceHandle),
    Value(Value),
    Frame(LiveViewFrame),
}

pub(crate) struct Job {
    pub request: Request,
    pub cancel: CancelToken,
    pub reply: oneshot::Sender<EngineResult<Reply>>,
}

/// Caller side of the queue.
#[derive(Clone)]
pub(crate) struct QueueHandle {
    tx: mpsc::Sender<Job>,
    timeout: Duration,
}

impl QueueHandle {
    pub fn new(tx: mpsc::Sender<Job>, timeout: Duration) -> Self {
        Self { tx, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Enqueue `request` and wait up to the command timeout for its result.
    pub async fn call(&self, request: Request) -> EngineResult<Reply> {
        let cancel = CancelToken::new();
        let rx = self.enqueue(request, cancel.clone()).await?;
        self.wait(rx, &cancel, self.timeout).await
    }

    /// Enqueue without waiting for completion.
    pub async fn enqueue(
        &self,
        request: Request,
        cancel: CancelToken,
    ) -> EngineResult<oneshot::Receiver<EngineResult<Reply>>> {
        let (reply, rx) = oneshot::channel();
        let job = Job {
            request,
            cancel,
            reply,
        };
        match tokio::time::timeout(self.timeout, self.tx.send(job)).await {
            Ok(Ok(())) => Ok(rx),
            Ok(Err(_)) => Err(EngineError::DispatcherClosed),
            Err(_) => Err(EngineError::Timeout(self.timeout)),
        }
    }

    /// Wait for a queued job. On timeout the job is cancelled so it stops at its
    /// next retry boundary, or never starts.
    pub async fn wait(
        &self,
        rx: oneshot::Receiver<EngineResult<Reply>>,
        cancel: &CancelToken,
        timeout: Duration,
    ) -> EngineResult<Reply> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EngineError::DispatcherClosed),
            Err(_) => {
                cancel.cancel();
                Err(EngineError::Timeout(timeout))
            }
        }
    }
}

/// Worker-side state. Runs on its own thread until shut down or every sender is gone.
pub(crate) struct DispatchWorker {
    sdk: Arc<dyn CameraSdk>,
    session: SessionManager,
    live_view: LiveViewController,
    dispatcher: Arc<EventDispatcher>,
    device_lost: Arc<AtomicBool>,
    lost_subscription: SubscriptionId,
    pump_interval: Duration,
    _lease: SdkLease,
}

impl DispatchWorker {
    pub fn new(
        sdk: Arc<dyn CameraSdk>,
        session: SessionManager,
        live_view: LiveViewController,
        dispatcher: Arc<EventDispatcher>,
        pump_interval: Duration,
        lease: SdkLease,
    ) -> Self {
        let device_lost = Arc::new(AtomicBool::new(false));
        let flag = device_lost.clone();
        let lost_subscription = dispatcher.subscribe(
            EventKind::CameraStateChanged,
            Arc::new(FnListener::new(move |record| {
                if record.is_shutdown() {
                    flag.store(true, Ordering::SeqCst);
                }
                Ok(())
            })),
        );
        Self {
            sdk,
            session,
            live_view,
            dispatcher,
            device_lost,
            lost_subscription,
            pump_interval,
            _lease: lease,
        }
    }

    /// Drive the queue to completion.
    pub fn run(mut self, mut rx: mpsc::Receiver<Job>) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Failed to build dispatch runtime: {}", e);
                return;
            }
        };
        info!("Dispatch worker started");

        let pump_interval = self.pump_interval;
        loop {
            // The timer must be created inside the runtime so it can register.
            let next = runtime.block_on(async {
                tokio::time::timeout(pump_interval, rx.recv()).await
            });
            match next {
                Ok(Some(job)) => {
                    if self.handle(job) {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("All engine handles dropped");
                    break;
                }
                Err(_) => {}
            }
            self.pump();
        }

        self.close();
        rx.close();
        // Fail whatever is still queued instead of leaving callers to time out.
        while let Ok(job) = rx.try_recv() {
            let _ = job.reply.send(Err(EngineError::DispatcherClosed));
        }
        self.dispatcher.unsubscribe(self.lost_subscription);
        info!("Dispatch worker stopped");
    }

    /// Returns whether the worker should stop.
    fn handle(&mut self, job: Job) -> bool {
        let Job {
            request,
            cancel,
            reply,
        } = job;
        let name = request.name();
        let shutdown = matches!(request, Request::Shutdown);

        let result = if cancel.is_cancelled() {
            debug!(request = name, "Skipping cancelled job");
            Err(EngineError::Cancelled)
        } else {
            trace!(request = name, "Processing job");
            self.process(request, &cancel)
        };
        if let Err(e) = &result {
            debug!(request = name, "Job failed: {}", e);
        }
        if reply.send(result).is_err() {
            debug!(request = name, "Caller gone before completion");
        }
        shutdown
    }

    fn process(&mut self, request: Request, cancel: &CancelToken) -> EngineResult<Reply> {
        match request {
            Request::ListCameras => Ok(Reply::Cameras(self.sdk.enumerate_cameras()?)),
            Request::Connect(device) => self
                .session
                .connect(device, cancel)
                .map(Reply::Connected),
            Request::Disconnect => self
                .session
                .disconnect(&mut self.live_view, cancel)
                .map(|()| Reply::Unit),
            Request::Execute(command) => self.execute(command).map(Reply::Value),
            Request::StartLiveView => self
                .live_view
                .start(&self.session, cancel)
                .map(|()| Reply::Unit),
            Request::StopLiveView => self
                .live_view
                .stop(&self.session, cancel)
                .map(|()| Reply::Unit),
            Request::DownloadFrame => self
                .live_view
                .download_frame(&self.session, cancel)
                .map(Reply::Frame),
            Request::SetZoom(zoom) => self
                .live_view
                .set_zoom(&self.session, zoom, cancel)
                .map(|()| Reply::Unit),
            Request::SetZoomPosition { x, y } => self
                .live_view
                .set_zoom_position(&self.session, x, y, cancel)
                .map(|()| Reply::Unit),
            Request::AutofocusAt { x, y } => self
                .live_view
                .autofocus_at(&self.session, x, y, cancel)
                .map(|()| Reply::Unit),
            Request::DriveLens(drive) => self
                .live_view
                .drive_lens(&self.session, drive, cancel)
                .map(|()| Reply::Unit),
            Request::SetAfMode(mode) => self
                .live_view
                .set_af_mode(&self.session, mode, cancel)
                .map(|()| Reply::Unit),
            Request::SetFrameRate(fps) => {
                self.live_view.set_frame_rate(fps);
                Ok(Reply::Unit)
            }
            Request::Shutdown => {
                self.close();
                Ok(Reply::Unit)
            }
        }
    }

    /// Run a caller-built command. Live-view operations go through the controller so
    /// its state stays in step with the device.
    fn execute(&mut self, mut command: Command) -> EngineResult<Value> {
        let cancel = command.cancel_token();
        match command.operation() {
            Operation::OpenSession | Operation::CloseSession => Err(EngineError::InvalidArgument(
                "sessions are opened and closed with connect and disconnect".to_string(),
            )),
            Operation::StartEvf => self
                .live_view
                .start(&self.session, &cancel)
                .map(|()| Value::Unit),
            Operation::EndEvf => self
                .live_view
                .stop(&self.session, &cancel)
                .map(|()| Value::Unit),
            Operation::DownloadEvf => self
                .live_view
                .download_frame(&self.session, &cancel)
                .map(Value::Frame),
            Operation::DriveLens(_) | Operation::DoEvfAf(_) => {
                self.live_view.require_active()?;
                self.session.execute(&mut command)
            }
            _ => self.session.execute(&mut command),
        }
    }

    fn pump(&mut self) {
        if self.session.state() == SessionState::Closed {
            return;
        }
        if let Err(e) = self.sdk.pump_events() {
            warn!("Event pump failed: {}", e);
        }
        if self.device_lost.swap(false, Ordering::SeqCst) {
            self.session.mark_device_lost(&mut self.live_view);
        }
    }

    fn close(&mut self) {
        if let Err(e) = self
            .session
            .disconnect(&mut self.live_view, &CancelToken::new())
        {
            warn!("Session did not close cleanly: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_recovery::RetryPolicies;
    use crate::hardware::mock::{MockSdk, SdkOp};
    use crate::hardware::{HandleRegistry, SdkLifetime};
    use crate::session::SessionSettings;

    struct Harness {
        sdk: Arc<MockSdk>,
        tx: mpsc::Sender<Job>,
        worker: std::thread::JoinHandle<()>,
    }

    /// Worker on a plain thread, driven from a test with no tokio runtime.
    fn spawn_worker() -> Harness {
        let sdk = Arc::new(MockSdk::new());
        let dyn_sdk: Arc<dyn CameraSdk> = sdk.clone();
        let lease = SdkLifetime::new().acquire(dyn_sdk.clone()).unwrap();
        let registry = HandleRegistry::new(dyn_sdk.clone());
        let dispatcher = EventDispatcher::new(dyn_sdk.clone(), registry.clone());
        let session = SessionManager::new(
            dyn_sdk.clone(),
            registry,
            dispatcher.clone(),
            RetryPolicies::new(),
            SessionSettings::default(),
        );
        let live_view = LiveViewController::new(Duration::from_millis(100));
        let worker = DispatchWorker::new(
            dyn_sdk,
            session,
            live_view,
            dispatcher,
            Duration::from_millis(5),
            lease,
        );
        let (tx, rx) = mpsc::channel(8);
        let worker = std::thread::spawn(move || worker.run(rx));
        Harness { sdk, tx, worker }
    }

    fn call(tx: &mpsc::Sender<Job>, request: Request) -> EngineResult<Reply> {
        let (reply, rx) = oneshot::channel();
        tx.blocking_send(Job {
            request,
            cancel: CancelToken::new(),
            reply,
        })
        .map_err(|_| EngineError::DispatcherClosed)?;
        rx.blocking_recv()
            .map_err(|_| EngineError::DispatcherClosed)?
    }

    #[test]
    fn test_worker_runs_without_ambient_runtime() {
        let harness = spawn_worker();

        assert!(matches!(
            call(&harness.tx, Request::Connect(None)),
            Ok(Reply::Connected(_))
        ));
        // Idle long enough for several pump timeouts to elapse.
        std::thread::sleep(Duration::from_millis(30));
        assert!(matches!(
            call(&harness.tx, Request::Execute(Command::take_picture())),
            Ok(Reply::Value(Value::Unit))
        ));
        assert!(matches!(
            call(&harness.tx, Request::Shutdown),
            Ok(Reply::Unit)
        ));

        harness.worker.join().unwrap();
        assert_eq!(harness.sdk.call_count(SdkOp::CloseSession), 1);
        assert!(matches!(
            call(&harness.tx, Request::ListCameras),
            Err(EngineError::DispatcherClosed)
        ));
    }

    #[test]
    fn test_cancelled_job_is_skipped() {
        let harness = spawn_worker();
        let (reply, rx) = oneshot::channel();
        let cancel = CancelToken::new();
        cancel.cancel();
        let sent = harness.tx.blocking_send(Job {
            request: Request::ListCameras,
            cancel,
            reply,
        });
        assert!(sent.is_ok());

        assert!(matches!(rx.blocking_recv(), Ok(Err(EngineError::Cancelled))));
        assert_eq!(harness.sdk.call_count(SdkOp::EnumerateCameras), 0);

        drop(harness.tx);
        harness.worker.join().unwrap();
        assert!(!harness.sdk.is_initialized());
    }
}
