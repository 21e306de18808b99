//! Device commands.
//!
//! A [`Command`] wraps one device operation together with its retry policy and a
//! cancellation token. `execute` performs exactly one native call per attempt and
//! retries only what the policy allows; the calling worker is blocked for the whole
//! retry loop, so no other command can interleave.

use crate::error::{EngineError, EngineResult};
use crate::error_recovery::{Backoff, RetryOn, RetryPolicy};
use crate::hardware::{
    CameraSdk, Capacity, DeviceHandle, HandleRegistry, PropertyId, PropertyValue,
};
use crate::session::SessionState;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use edsdk_sys as sys;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Shutter button positions for `PressShutterButton`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutterButton {
    /// Released
    Off,
    /// Half press: meter and focus
    Halfway,
    /// Full press: shoot
    Completely,
    /// Half press without autofocus
    HalfwayNonAf,
    /// Full press without autofocus
    CompletelyNonAf,
}

impl ShutterButton {
    /// Parameter for `kEdsCameraCommand_PressShutterButton`.
    pub fn param(self) -> i32 {
        match self {
            ShutterButton::Off => sys::kEdsCameraCommand_ShutterButton_OFF,
            ShutterButton::Halfway => sys::kEdsCameraCommand_ShutterButton_Halfway,
            ShutterButton::Completely => sys::kEdsCameraCommand_ShutterButton_Completely,
            ShutterButton::HalfwayNonAf => sys::kEdsCameraCommand_ShutterButton_Halfway_NonAF,
            ShutterButton::CompletelyNonAf => {
                sys::kEdsCameraCommand_ShutterButton_Completely_NonAF
            }
        }
    }
}

/// Which way a lens drive moves the focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusDirection {
    /// Towards the minimum focus distance
    Near,
    /// Towards infinity
    Far,
}

/// Relative focus nudge, magnitude 1 (smallest) to 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LensDrive {
    direction: FocusDirection,
    magnitude: u8,
}

impl LensDrive {
    /// Fails with `InvalidArgument` unless `magnitude` is 1, 2 or 3.
    pub fn new(direction: FocusDirection, magnitude: u8) -> EngineResult<Self> {
        if !(1..=3).contains(&magnitude) {
            return Err(EngineError::InvalidArgument(format!(
                "lens drive magnitude must be 1, 2 or 3, got {magnitude}"
            )));
        }
        Ok(Self {
            direction,
            magnitude,
        })
    }

    /// Nudge towards the camera.
    pub fn near(magnitude: u8) -> EngineResult<Self> {
        Self::new(FocusDirection::Near, magnitude)
    }

    /// Nudge towards infinity.
    pub fn far(magnitude: u8) -> EngineResult<Self> {
        Self::new(FocusDirection::Far, magnitude)
    }

    /// Direction of travel
    pub fn direction(&self) -> FocusDirection {
        self.direction
    }

    /// Step size, 1 to 3
    pub fn magnitude(&self) -> u8 {
        self.magnitude
    }

    /// Parameter for `kEdsCameraCommand_DriveLensEvf`: near 1..=3, far 0x8001..=0x8003.
    pub fn param(&self) -> i32 {
        let base = match self.direction {
            FocusDirection::Near => 0,
            FocusDirection::Far => 0x8000,
        };
        base | i32::from(self.magnitude)
    }
}

/// Field-less operation discriminant, used for policy lookup and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// [`Operation::OpenSession`]
    OpenSession,
    /// [`Operation::CloseSession`]
    CloseSession,
    /// [`Operation::SetCapacity`]
    SetCapacity,
    /// [`Operation::GetProperty`]
    GetProperty,
    /// [`Operation::SetProperty`]
    SetProperty,
    /// [`Operation::GetPropertyDesc`]
    GetPropertyDesc,
    /// [`Operation::TakePicture`]
    TakePicture,
    /// [`Operation::PressShutter`]
    PressShutter,
    /// [`Operation::StartEvf`]
    StartEvf,
    /// [`Operation::EndEvf`]
    EndEvf,
    /// [`Operation::DownloadEvf`]
    DownloadEvf,
    /// [`Operation::DriveLens`]
    DriveLens,
    /// [`Operation::DoEvfAf`]
    DoEvfAf,
}

impl OperationKind {
    /// Session state the operation normally runs in.
    pub fn required_state(self) -> SessionState {
        match self {
            OperationKind::OpenSession => SessionState::Opening,
            OperationKind::CloseSession => SessionState::Closing,
            _ => SessionState::Open,
        }
    }

    /// Whether the operation may run while the session is in `state`.
    ///
    /// Besides its own state, configuration may run while opening and the
    /// live-view stop may run while closing.
    pub fn permitted_in(self, state: SessionState) -> bool {
        state == self.required_state()
            || match self {
                OperationKind::SetCapacity | OperationKind::SetProperty => {
                    state == SessionState::Opening
                }
                OperationKind::EndEvf => state == SessionState::Closing,
                _ => false,
            }
    }

    /// Every kind, in declaration order.
    pub const ALL: [OperationKind; 13] = [
        OperationKind::OpenSession,
        OperationKind::CloseSession,
        OperationKind::SetCapacity,
        OperationKind::GetProperty,
        OperationKind::SetProperty,
        OperationKind::GetPropertyDesc,
        OperationKind::TakePicture,
        OperationKind::PressShutter,
        OperationKind::StartEvf,
        OperationKind::EndEvf,
        OperationKind::DownloadEvf,
        OperationKind::DriveLens,
        OperationKind::DoEvfAf,
    ];

    /// Look a kind up by its snake_case name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Built-in retry policy, before configuration overrides.
    pub fn default_policy(self) -> RetryPolicy {
        match self {
            // Relative nudges must not be re-sent once the camera may have applied them.
            OperationKind::DriveLens => {
                RetryPolicy::default().with_retry_on(RetryOn::BusyNotAccepted)
            }
            OperationKind::DownloadEvf => RetryPolicy::default()
                .with_max_attempts(3)
                .with_backoff(Backoff::fixed(Duration::from_millis(100))),
            _ => RetryPolicy::default(),
        }
    }

    /// Snake_case name, as used in `retry.overrides`.
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::OpenSession => "open_session",
            OperationKind::CloseSession => "close_session",
            OperationKind::SetCapacity => "set_capacity",
            OperationKind::GetProperty => "get_property",
            OperationKind::SetProperty => "set_property",
            OperationKind::GetPropertyDesc => "get_property_desc",
            OperationKind::TakePicture => "take_picture",
            OperationKind::PressShutter => "press_shutter",
            OperationKind::StartEvf => "start_evf",
            OperationKind::EndEvf => "end_evf",
            OperationKind::DownloadEvf => "download_evf",
            OperationKind::DriveLens => "drive_lens",
            OperationKind::DoEvfAf => "do_evf_af",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device operation and its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// `EdsOpenSession`
    OpenSession,
    /// `EdsCloseSession`
    CloseSession,
    /// `EdsSetCapacity`
    SetCapacity(Capacity),
    /// `EdsGetPropertyData`
    GetProperty {
        /// Property to read
        property: PropertyId,
        /// Property parameter, usually 0
        param: i32,
    },
    /// `EdsSetPropertyData`
    SetProperty {
        /// Property to write
        property: PropertyId,
        /// Property parameter, usually 0
        param: i32,
        /// New value
        value: PropertyValue,
    },
    /// `EdsGetPropertyDesc`
    GetPropertyDesc(PropertyId),
    /// `kEdsCameraCommand_TakePicture`
    TakePicture,
    /// `kEdsCameraCommand_PressShutterButton`
    PressShutter(ShutterButton),
    /// Route live view to the host.
    StartEvf,
    /// Stop routing live view to the host.
    EndEvf,
    /// Download one live-view frame.
    DownloadEvf,
    /// `kEdsCameraCommand_DriveLensEvf`
    DriveLens(LensDrive),
    /// `kEdsCameraCommand_DoEvfAf`, on or off
    DoEvfAf(bool),
}

impl Operation {
    /// Discriminant used for policy lookup.
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::OpenSession => OperationKind::OpenSession,
            Operation::CloseSession => OperationKind::CloseSession,
            Operation::SetCapacity(_) => OperationKind::SetCapacity,
            Operation::GetProperty { .. } => OperationKind::GetProperty,
            Operation::SetProperty { .. } => OperationKind::SetProperty,
            Operation::GetPropertyDesc(_) => OperationKind::GetPropertyDesc,
            Operation::TakePicture => OperationKind::TakePicture,
            Operation::PressShutter(_) => OperationKind::PressShutter,
            Operation::StartEvf => OperationKind::StartEvf,
            Operation::EndEvf => OperationKind::EndEvf,
            Operation::DownloadEvf => OperationKind::DownloadEvf,
            Operation::DriveLens(_) => OperationKind::DriveLens,
            Operation::DoEvfAf(_) => OperationKind::DoEvfAf,
        }
    }

    /// One attempt: a single device call, plus the scoped acquisitions it needs.
    fn invoke(&self, ctx: &ExecContext<'_>, device: DeviceHandle) -> crate::error::SdkResult<Value> {
        let sdk = ctx.sdk;
        match self {
            Operation::OpenSession => sdk.open_session(device).map(|()| Value::Unit),
            Operation::CloseSession => sdk.close_session(device).map(|()| Value::Unit),
            Operation::SetCapacity(capacity) => {
                sdk.set_capacity(device, *capacity).map(|()| Value::Unit)
            }
            Operation::GetProperty { property, param } => sdk
                .get_property(device, *property, *param)
                .map(Value::Property),
            Operation::SetProperty {
                property,
                param,
                value,
            } => sdk
                .set_property(device, *property, *param, value)
                .map(|()| Value::Unit),
            Operation::GetPropertyDesc(property) => sdk
                .get_property_desc(device, *property)
                .map(Value::PropertyDesc),
            Operation::TakePicture => sdk
                .send_command(device, sys::kEdsCameraCommand_TakePicture, 0)
                .map(|()| Value::Unit),
            Operation::PressShutter(button) => sdk
                .send_command(device, sys::kEdsCameraCommand_PressShutterButton, button.param())
                .map(|()| Value::Unit),
            Operation::StartEvf => sdk
                .set_property(
                    device,
                    PropertyId::EVF_OUTPUT_DEVICE,
                    0,
                    &PropertyValue::UInt32(sys::kEdsEvfOutputDevice_PC),
                )
                .map(|()| Value::Unit),
            Operation::EndEvf => sdk
                .set_property(
                    device,
                    PropertyId::EVF_OUTPUT_DEVICE,
                    0,
                    &PropertyValue::UInt32(0),
                )
                .map(|()| Value::Unit),
            Operation::DownloadEvf => {
                let stream = ctx
                    .registry
                    .acquire("evf stream", |sdk| sdk.create_memory_stream(0))?;
                let image = ctx
                    .registry
                    .acquire("evf image", |sdk| sdk.create_evf_image_ref(stream.raw()))?;
                sdk.download_evf_image(device, image.raw())?;
                let data = sdk.stream_bytes(stream.raw())?;
                Ok(Value::Frame(LiveViewFrame {
                    sequence: 0,
                    data: Bytes::from(data),
                    captured_at: Utc::now(),
                }))
            }
            Operation::DriveLens(drive) => sdk
                .send_command(device, sys::kEdsCameraCommand_DriveLensEvf, drive.param())
                .map(|()| Value::Unit),
            Operation::DoEvfAf(on) => {
                let param = if *on {
                    sys::kEdsCameraCommand_EvfAf_ON
                } else {
                    sys::kEdsCameraCommand_EvfAf_OFF
                };
                sdk.send_command(device, sys::kEdsCameraCommand_DoEvfAf, param)
                    .map(|()| Value::Unit)
            }
        }
    }
}

/// One live-view frame, copied out of SDK memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveViewFrame {
    /// Position in the stream since live view started, from 1.
    pub sequence: u64,
    /// Encoded frame as delivered by the camera (JPEG).
    pub data: Bytes,
    /// Host time at which the frame was copied.
    pub captured_at: DateTime<Utc>,
}

/// Completion value of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// The operation returns nothing.
    Unit,
    /// Result of `GetProperty`
    Property(PropertyValue),
    /// Result of `GetPropertyDesc`
    PropertyDesc(Vec<i32>),
    /// Result of `DownloadEvf`
    Frame(LiveViewFrame),
}

impl Value {
    /// The property value, if this is one.
    pub fn into_property(self) -> Option<PropertyValue> {
        match self {
            Value::Property(value) => Some(value),
            _ => None,
        }
    }

    /// The allowed values, if this is a description.
    pub fn into_property_desc(self) -> Option<Vec<i32>> {
        match self {
            Value::PropertyDesc(values) => Some(values),
            _ => None,
        }
    }

    /// The frame, if this is one.
    pub fn into_frame(self) -> Option<LiveViewFrame> {
        match self {
            Value::Frame(frame) => Some(frame),
            _ => None,
        }
    }
}

#[derive(Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

/// Shared cancellation flag. Cloning shares the flag.
#[derive(Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake any waiter.
    pub fn cancel(&self) {
        *self.state.cancelled.lock() = true;
        self.state.wake.notify_all();
    }

    /// Whether `cancel` has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        *self.state.cancelled.lock()
    }

    /// Sleep for `timeout` unless cancelled first. Returns whether it was cancelled.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = self.state.cancelled.lock();
        while !*cancelled {
            if self
                .state
                .wake
                .wait_until(&mut cancelled, deadline)
                .timed_out()
            {
                break;
            }
        }
        *cancelled
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// What a command runs against. Built by the dispatch worker for each command.
pub struct ExecContext<'a> {
    /// Native library
    pub sdk: &'a dyn CameraSdk,
    /// Scoped acquisition of SDK objects
    pub registry: &'a Arc<HandleRegistry>,
    /// Device of the current session, if any
    pub device: Option<DeviceHandle>,
    /// Session state at the time of execution
    pub session: SessionState,
}

/// An [`Operation`] with its retry policy and cancellation token.
#[derive(Debug, Clone)]
pub struct Command {
    op: Operation,
    target: Option<DeviceHandle>,
    policy: RetryPolicy,
    attempts: u32,
    cancel: CancelToken,
}

impl Command {
    /// Wrap `op` with the built-in policy for its kind.
    pub fn new(op: Operation) -> Self {
        let policy = op.kind().default_policy();
        Self {
            op,
            target: None,
            policy,
            attempts: 0,
            cancel: CancelToken::new(),
        }
    }

    /// Shoot a still.
    pub fn take_picture() -> Self {
        Self::new(Operation::TakePicture)
    }

    /// Move the shutter button to `button`.
    pub fn press_shutter(button: ShutterButton) -> Self {
        Self::new(Operation::PressShutter(button))
    }

    /// Read `property` with parameter 0.
    pub fn get_property(property: PropertyId) -> Self {
        Self::new(Operation::GetProperty { property, param: 0 })
    }

    /// Write `property` with parameter 0.
    pub fn set_property(property: PropertyId, value: PropertyValue) -> Self {
        Self::new(Operation::SetProperty {
            property,
            param: 0,
            value,
        })
    }

    /// Step the focus motor; live view must be active.
    pub fn drive_lens(drive: LensDrive) -> Self {
        Self::new(Operation::DriveLens(drive))
    }

    /// Replace the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Share an existing token, e.g. the one of the queue job carrying this command.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run against `device` instead of the session's device.
    pub fn with_target(mut self, device: DeviceHandle) -> Self {
        self.target = Some(device);
        self
    }

    /// The wrapped operation
    pub fn operation(&self) -> &Operation {
        &self.op
    }

    /// Kind of the wrapped operation
    pub fn kind(&self) -> OperationKind {
        self.op.kind()
    }

    /// Retry policy in effect
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// A clone of the command's token.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run to completion: one native call per attempt, busy failures retried per the
    /// policy, cancellation checked before the first attempt and between attempts.
    ///
    /// Fails with `SessionNotOpen` (or `InvalidSessionState`) without touching the
    /// device when the session is not in a state the operation may run in.
    pub fn execute(&mut self, ctx: &ExecContext<'_>) -> EngineResult<Value> {
        let kind = self.op.kind();
        if self.cancel.is_cancelled() {
            debug!(operation = %kind, "Cancelled before first attempt");
            return Err(EngineError::Cancelled);
        }

        if !kind.permitted_in(ctx.session) {
            let required = kind.required_state();
            return Err(if required == SessionState::Open {
                EngineError::SessionNotOpen
            } else {
                EngineError::InvalidSessionState {
                    expected: required.as_str(),
                    found: ctx.session.as_str(),
                }
            });
        }
        let device = self
            .target
            .or(ctx.device)
            .ok_or(EngineError::SessionNotOpen)?;

        loop {
            self.attempts += 1;
            debug!(operation = %kind, attempt = self.attempts, "Executing");
            match self.op.invoke(ctx, device) {
                Ok(value) => return Ok(value),
                Err(err) if self.policy.should_retry(&err, self.attempts) => {
                    let delay = self.policy.delay_after(self.attempts);
                    warn!(
                        operation = %kind,
                        attempt = self.attempts,
                        max_attempts = self.policy.max_attempts,
                        "Device busy, retrying in {:?}: {}",
                        delay,
                        err
                    );
                    if self.cancel.wait(delay) {
                        debug!(operation = %kind, "Cancelled between attempts");
                        return Err(EngineError::Cancelled);
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockSdk, SdkCall, SdkOp};

    const DEVICE: DeviceHandle = DeviceHandle(1);

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_backoff(Backoff::fixed(Duration::from_millis(1)))
    }

    fn open_sdk() -> (Arc<MockSdk>, Arc<HandleRegistry>) {
        let sdk = Arc::new(MockSdk::new());
        sdk.open_session(DEVICE).unwrap();
        sdk.clear_calls();
        let registry = HandleRegistry::new(sdk.clone());
        (sdk, registry)
    }

    fn ctx<'a>(sdk: &'a MockSdk, registry: &'a Arc<HandleRegistry>) -> ExecContext<'a> {
        ExecContext {
            sdk,
            registry,
            device: Some(DEVICE),
            session: SessionState::Open,
        }
    }

    #[test]
    fn test_busy_then_success_uses_exactly_n_calls() {
        let (sdk, registry) = open_sdk();
        for n in 1..=5u32 {
            sdk.clear_calls();
            sdk.fail_next(SdkOp::SendCommand, sys::EDS_ERR_DEVICE_BUSY, n - 1);
            let mut command = Command::take_picture().with_policy(fast(n));

            assert_eq!(command.execute(&ctx(&sdk, &registry)).unwrap(), Value::Unit);
            assert_eq!(command.attempts(), n);
            assert_eq!(sdk.call_count(SdkOp::SendCommand), n as usize);
        }
    }

    #[test]
    fn test_busy_past_bound_surfaces_busy() {
        let (sdk, registry) = open_sdk();
        sdk.fail_next(SdkOp::SendCommand, sys::EDS_ERR_DEVICE_BUSY, 10);
        let mut command = Command::take_picture().with_policy(fast(3));

        let err = command.execute(&ctx(&sdk, &registry)).unwrap_err();
        assert!(err.is_busy());
        assert_eq!(sdk.call_count(SdkOp::SendCommand), 3);
    }

    #[test]
    fn test_non_busy_error_is_not_retried() {
        let (sdk, registry) = open_sdk();
        sdk.fail_next(SdkOp::SetProperty, sys::EDS_ERR_COMM_DISCONNECTED, 1);
        let mut command =
            Command::set_property(PropertyId::ISO_SPEED, PropertyValue::UInt32(0x50))
                .with_policy(fast(5));

        let err = command.execute(&ctx(&sdk, &registry)).unwrap_err();
        assert_eq!(err.code(), Some(sys::EDS_ERR_COMM_DISCONNECTED));
        assert_eq!(sdk.call_count(SdkOp::SetProperty), 1);
    }

    #[test]
    fn test_session_not_open_makes_no_call() {
        let (sdk, registry) = open_sdk();
        let mut context = ctx(&sdk, &registry);
        context.session = SessionState::Closed;

        let err = Command::take_picture().execute(&context).unwrap_err();
        assert!(matches!(err, EngineError::SessionNotOpen));
        assert!(sdk.calls().is_empty());
    }

    #[test]
    fn test_target_overrides_session_device() {
        let (sdk, registry) = open_sdk();
        sdk.set_camera_count(2);
        let mut command = Command::take_picture()
            .with_target(DeviceHandle(2))
            .with_policy(fast(3));

        let err = command.execute(&ctx(&sdk, &registry)).unwrap_err();
        assert_eq!(err.code(), Some(sys::EDS_ERR_SESSION_NOT_OPEN));
        assert_eq!(sdk.call_count(SdkOp::SendCommand), 1);
    }

    #[test]
    fn test_cancelled_before_first_attempt_makes_no_call() {
        let (sdk, registry) = open_sdk();
        let mut command = Command::take_picture();
        command.cancel_token().cancel();

        let err = command.execute(&ctx(&sdk, &registry)).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert!(sdk.calls().is_empty());
    }

    #[test]
    fn test_cancel_aborts_at_retry_boundary() {
        let (sdk, registry) = open_sdk();
        sdk.fail_next(SdkOp::SendCommand, sys::EDS_ERR_DEVICE_BUSY, 10);
        let mut command = Command::take_picture().with_policy(
            RetryPolicy::default().with_backoff(Backoff::fixed(Duration::from_secs(5))),
        );
        let token = command.cancel_token();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            token.cancel();
        });

        let started = Instant::now();
        let err = command.execute(&ctx(&sdk, &registry)).unwrap_err();
        canceller.join().unwrap();

        assert!(matches!(err, EngineError::Cancelled));
        assert_eq!(sdk.call_count(SdkOp::SendCommand), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_drive_lens_does_not_retry_possibly_executed_busy() {
        let (sdk, registry) = open_sdk();
        sdk.set_property_value(
            PropertyId::EVF_OUTPUT_DEVICE,
            PropertyValue::UInt32(sys::kEdsEvfOutputDevice_PC),
        );
        let drive = LensDrive::near(2).unwrap();

        sdk.fail_next(SdkOp::SendCommand, sys::EDS_ERR_PTP_DEVICE_BUSY, 1);
        let mut command = Command::drive_lens(drive);
        command.policy.backoff = Backoff::fixed(Duration::from_millis(1));
        assert!(command.execute(&ctx(&sdk, &registry)).unwrap_err().is_busy());
        assert_eq!(sdk.call_count(SdkOp::SendCommand), 1);

        sdk.clear_calls();
        sdk.fail_next(SdkOp::SendCommand, sys::EDS_ERR_DEVICE_BUSY, 1);
        let mut command = Command::drive_lens(drive);
        command.policy.backoff = Backoff::fixed(Duration::from_millis(1));
        command.execute(&ctx(&sdk, &registry)).unwrap();
        assert_eq!(
            sdk.calls(),
            vec![
                SdkCall::SendCommand {
                    command: sys::kEdsCameraCommand_DriveLensEvf,
                    param: 2
                };
                2
            ]
        );
    }

    #[test]
    fn test_lens_drive_params() {
        assert_eq!(LensDrive::near(1).unwrap().param(), sys::kEdsEvfDriveLens_Near1);
        assert_eq!(LensDrive::near(3).unwrap().param(), sys::kEdsEvfDriveLens_Near3);
        assert_eq!(LensDrive::far(2).unwrap().param(), sys::kEdsEvfDriveLens_Far2);
        assert!(LensDrive::far(4).is_err());
        assert!(LensDrive::near(0).is_err());
    }

    #[test]
    fn test_download_evf_releases_on_failure() {
        let (sdk, registry) = open_sdk();
        // Output device still on the camera's own screen: frame never becomes ready.
        let mut command = Command::new(Operation::DownloadEvf).with_policy(fast(2));

        let err = command.execute(&ctx(&sdk, &registry)).unwrap_err();
        assert!(err.is_busy());
        assert_eq!(sdk.call_count(SdkOp::DownloadEvfImage), 2);
        assert_eq!(sdk.call_count(SdkOp::Release), 4);
        assert!(sdk.outstanding_objects().is_empty());
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_download_evf_copies_frame() {
        let (sdk, registry) = open_sdk();
        sdk.set_property_value(
            PropertyId::EVF_OUTPUT_DEVICE,
            PropertyValue::UInt32(sys::kEdsEvfOutputDevice_PC),
        );

        let frame = Command::new(Operation::DownloadEvf)
            .execute(&ctx(&sdk, &registry))
            .unwrap()
            .into_frame()
            .unwrap();
        assert_eq!(&frame.data[..2], &[0xFF, 0xD8]);
        assert!(sdk.outstanding_objects().is_empty());
    }
}
