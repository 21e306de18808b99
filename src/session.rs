//! Device session lifecycle.
//!
//! `Closed → Opening → Open → Closing → Closed`. The manager is owned by the
//! dispatch worker; other contexts observe the state through a watch channel.

use crate::command::{CancelToken, Command, ExecContext, Operation, Value};
use crate::error::{EngineError, EngineResult, SdkError};
use crate::error_recovery::RetryPolicies;
use crate::events::EventDispatcher;
use crate::hardware::{
    CameraSdk, Capacity, DeviceHandle, HandleRegistry, NativeEventSink, PropertyId,
    PropertyValue,
};
use crate::live_view::LiveViewController;
use edsdk_sys as sys;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Session lifecycle. Device operations need `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No session
    Closed,
    /// Opening and configuring the device
    Opening,
    /// Ready for commands
    Open,
    /// Stopping live view and closing
    Closing,
}

impl SessionState {
    /// Lowercase name, as used in error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Closed => "closed",
            SessionState::Opening => "opening",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage settings applied right after the session opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Host capacity advertised before transfers
    pub capacity: Capacity,
    /// Route new captures to the host instead of the card only.
    pub save_to_host: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            capacity: Capacity::default(),
            save_to_host: true,
        }
    }
}

/// Owns the session with one camera. Lives on the dispatch worker.
pub struct SessionManager {
    sdk: Arc<dyn CameraSdk>,
    registry: Arc<HandleRegistry>,
    dispatcher: Arc<EventDispatcher>,
    policies: RetryPolicies,
    settings: SessionSettings,
    state: SessionState,
    device: Option<DeviceHandle>,
    state_tx: watch::Sender<SessionState>,
}

impl SessionManager {
    /// Closed manager; nothing touches the device until `connect`.
    pub fn new(
        sdk: Arc<dyn CameraSdk>,
        registry: Arc<HandleRegistry>,
        dispatcher: Arc<EventDispatcher>,
        policies: RetryPolicies,
        settings: SessionSettings,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Closed);
        Self {
            sdk,
            registry,
            dispatcher,
            policies,
            settings,
            state: SessionState::Closed,
            device: None,
            state_tx,
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Device of the open session
    pub fn device(&self) -> Option<DeviceHandle> {
        self.device
    }

    /// Receiver that sees every state change.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// What a command executes against right now.
    pub fn exec_context(&self) -> ExecContext<'_> {
        ExecContext {
            sdk: self.sdk.as_ref(),
            registry: &self.registry,
            device: self.device,
            session: self.state,
        }
    }

    /// Run one command against this session.
    pub fn execute(&self, command: &mut Command) -> EngineResult<Value> {
        command.execute(&self.exec_context())
    }

    /// Build a command with this session's policy for its kind and run it.
    pub fn run(&self, op: Operation, cancel: &CancelToken) -> EngineResult<Value> {
        let policy = self.policies.for_kind(op.kind());
        let mut command = Command::new(op)
            .with_policy(policy)
            .with_cancel_token(cancel.clone());
        self.execute(&mut command)
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "Session state");
            self.state = next;
            self.state_tx.send_replace(next);
        }
    }

    /// Open a session with `device`, or with the first enumerated camera.
    pub fn connect(
        &mut self,
        device: Option<DeviceHandle>,
        cancel: &CancelToken,
    ) -> EngineResult<DeviceHandle> {
        if self.state != SessionState::Closed {
            return Err(EngineError::InvalidSessionState {
                expected: SessionState::Closed.as_str(),
                found: self.state.as_str(),
            });
        }

        self.transition(SessionState::Opening);
        match self.open(device, cancel) {
            Ok(device) => {
                self.transition(SessionState::Open);
                info!(?device, "Session open");
                Ok(device)
            }
            Err(e) => {
                warn!("Failed to open session: {}", e);
                if let Some(device) = self.device.take() {
                    self.unregister_sink(device);
                }
                self.transition(SessionState::Closed);
                Err(e)
            }
        }
    }

    fn open(
        &mut self,
        device: Option<DeviceHandle>,
        cancel: &CancelToken,
    ) -> EngineResult<DeviceHandle> {
        let device = match device {
            Some(device) => device,
            None => {
                let cameras = self.sdk.enumerate_cameras()?;
                debug!(count = cameras.len(), "Enumerated cameras");
                cameras.first().map(|c| c.handle).ok_or_else(|| {
                    SdkError::from_status(sys::EDS_ERR_DEVICE_NOT_FOUND, "no camera connected")
                })?
            }
        };

        self.device = Some(device);
        let sink: Arc<dyn NativeEventSink> = self.dispatcher.clone();
        self.sdk.set_event_sink(device, Some(sink))?;

        self.run(Operation::OpenSession, cancel)?;

        let configured = self
            .run(Operation::SetCapacity(self.settings.capacity), cancel)
            .and_then(|_| {
                if self.settings.save_to_host {
                    self.run(
                        Operation::SetProperty {
                            property: PropertyId::SAVE_TO,
                            param: 0,
                            value: PropertyValue::UInt32(sys::kEdsSaveTo_Host),
                        },
                        cancel,
                    )
                    .map(|_| ())
                } else {
                    Ok(())
                }
            });
        if let Err(e) = configured {
            // The device accepted the session; hand it back before giving up.
            if let Err(close) = self.sdk.close_session(device) {
                warn!("Failed to close half-configured session: {}", close);
            }
            return Err(e);
        }
        Ok(device)
    }

    /// Close the session. Live view is stopped first; the session always ends
    /// `Closed`, and the close-session failure (if any) is returned.
    pub fn disconnect(
        &mut self,
        live_view: &mut LiveViewController,
        cancel: &CancelToken,
    ) -> EngineResult<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }

        self.transition(SessionState::Closing);
        live_view.force_stop(self);

        let result = self.run(Operation::CloseSession, cancel).map(|_| ());
        if let Err(e) = &result {
            warn!("Close session failed, abandoning device: {}", e);
        }
        if let Some(device) = self.device.take() {
            self.unregister_sink(device);
        }
        self.transition(SessionState::Closed);
        info!("Session closed");
        result
    }

    /// The camera went away on its own (shutdown event). No native close is issued.
    pub fn mark_device_lost(&mut self, live_view: &mut LiveViewController) {
        if self.state == SessionState::Closed {
            return;
        }
        warn!(device = ?self.device, "Camera shut down, dropping session");
        live_view.reset();
        if let Some(device) = self.device.take() {
            self.unregister_sink(device);
        }
        self.transition(SessionState::Closed);
    }

    fn unregister_sink(&self, device: DeviceHandle) {
        if let Err(e) = self.sdk.set_event_sink(device, None) {
            debug!("Failed to unregister event handlers: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::error_recovery::{Backoff, RetryPolicy};
    use crate::hardware::mock::{MockSdk, SdkCall, SdkOp};
    use crate::live_view::LiveViewState;
    use std::time::Duration;

    fn setup(sdk: Arc<MockSdk>) -> (SessionManager, LiveViewController) {
        let registry = HandleRegistry::new(sdk.clone());
        let dispatcher = EventDispatcher::new(sdk.clone(), registry.clone());
        let policies = RetryPolicies::new().with_base(
            RetryPolicy::default().with_backoff(Backoff::fixed(Duration::from_millis(1))),
        );
        let session = SessionManager::new(
            sdk,
            registry,
            dispatcher,
            policies,
            SessionSettings::default(),
        );
        (session, LiveViewController::new(Duration::from_millis(100)))
    }

    #[test]
    fn test_connect_transitions_through_opening() {
        let sdk = Arc::new(MockSdk::new());
        let (mut session, _) = setup(sdk.clone());
        let mut states = session.watch_state();

        let device = session.connect(None, &CancelToken::new()).unwrap();

        assert_eq!(device, DeviceHandle(1));
        assert_eq!(session.state(), SessionState::Open);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), SessionState::Open);
        assert!(sdk.is_session_open(device));
        assert!(sdk.calls().contains(&SdkCall::SetCapacity(Capacity::default())));
        assert_eq!(
            sdk.property_value(PropertyId::SAVE_TO),
            Some(PropertyValue::UInt32(sys::kEdsSaveTo_Host))
        );
    }

    #[test]
    fn test_connect_without_cameras_is_device_not_found() {
        let sdk = Arc::new(MockSdk::with_cameras(0));
        let (mut session, _) = setup(sdk.clone());

        let err = session.connect(None, &CancelToken::new()).unwrap_err();

        assert_eq!(err.kind(), Some(ErrorKind::DeviceNotFound));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(sdk.call_count(SdkOp::OpenSession), 0);
    }

    #[test]
    fn test_open_retries_busy() {
        let sdk = Arc::new(MockSdk::new());
        sdk.fail_next(SdkOp::OpenSession, sys::EDS_ERR_DEVICE_BUSY, 2);
        let (mut session, _) = setup(sdk.clone());

        session.connect(None, &CancelToken::new()).unwrap();

        assert_eq!(sdk.call_count(SdkOp::OpenSession), 3);
        assert_eq!(session.state(), SessionState::Open);
    }

    #[test]
    fn test_terminal_open_failure_returns_to_closed() {
        let sdk = Arc::new(MockSdk::new());
        sdk.fail_next(SdkOp::OpenSession, sys::EDS_ERR_COMM_PORT_IS_IN_USE, 1);
        let (mut session, _) = setup(sdk.clone());

        let err = session.connect(None, &CancelToken::new()).unwrap_err();

        assert_eq!(err.kind(), Some(ErrorKind::Communication));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.device(), None);
        assert_eq!(sdk.call_count(SdkOp::OpenSession), 1);
    }

    #[test]
    fn test_capacity_failure_closes_and_returns_to_closed() {
        let sdk = Arc::new(MockSdk::new());
        sdk.fail_next(SdkOp::SetCapacity, sys::EDS_ERR_NOT_SUPPORTED, 1);
        let (mut session, _) = setup(sdk.clone());

        assert!(session.connect(None, &CancelToken::new()).is_err());
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!sdk.is_session_open(DeviceHandle(1)));
    }

    #[test]
    fn test_connect_rejected_unless_closed() {
        let sdk = Arc::new(MockSdk::new());
        let (mut session, _) = setup(sdk.clone());
        session.connect(None, &CancelToken::new()).unwrap();
        sdk.clear_calls();

        let err = session.connect(None, &CancelToken::new()).unwrap_err();

        assert!(matches!(err, EngineError::InvalidSessionState { .. }));
        assert!(sdk.calls().is_empty());
    }

    #[test]
    fn test_disconnect_stops_live_view_before_close() {
        let sdk = Arc::new(MockSdk::new());
        let (mut session, mut live_view) = setup(sdk.clone());
        let cancel = CancelToken::new();
        session.connect(None, &cancel).unwrap();
        live_view.start(&session, &cancel).unwrap();
        sdk.clear_calls();

        session.disconnect(&mut live_view, &cancel).unwrap();

        let calls = sdk.calls();
        let stop = calls
            .iter()
            .position(|c| {
                *c == SdkCall::SetProperty(PropertyId::EVF_OUTPUT_DEVICE, PropertyValue::UInt32(0))
            })
            .unwrap();
        let close = calls
            .iter()
            .position(|c| matches!(c, SdkCall::CloseSession(_)))
            .unwrap();
        assert!(stop < close);
        assert_eq!(live_view.state(), LiveViewState::Inactive);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_disconnect_reaches_closed_when_close_fails() {
        let sdk = Arc::new(MockSdk::new());
        let (mut session, mut live_view) = setup(sdk.clone());
        let cancel = CancelToken::new();
        session.connect(None, &cancel).unwrap();
        sdk.fail_next(SdkOp::CloseSession, sys::EDS_ERR_COMM_DISCONNECTED, 1);

        assert!(session.disconnect(&mut live_view, &cancel).is_err());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.device(), None);
    }

    #[test]
    fn test_disconnect_when_closed_is_noop() {
        let sdk = Arc::new(MockSdk::new());
        let (mut session, mut live_view) = setup(sdk.clone());

        session
            .disconnect(&mut live_view, &CancelToken::new())
            .unwrap();
        assert!(sdk.calls().is_empty());
    }
}
