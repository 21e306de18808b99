//! End-to-end engine scenarios against the simulated camera.

use edsdk_sys as sys;
use eos_tether::config::EngineConfig;
use eos_tether::engine::Engine;
use eos_tether::error::{EngineError, ErrorKind};
use eos_tether::events::{EventKind, FnListener};
use eos_tether::hardware::mock::{MockSdk, SdkCall, SdkOp};
use eos_tether::hardware::{PropertyId, PropertyValue};
use eos_tether::live_view::{LiveViewState, Zoom};
use eos_tether::session::SessionState;
use eos_tether::Operation;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry.backoff_ms = 2;
    config.retry.max_backoff_ms = 10;
    config.dispatch.command_timeout_ms = 2_000;
    config.dispatch.event_pump_interval_ms = 5;
    config.live_view.error_backoff_ms = 10;
    config
}

fn start(sdk: &Arc<MockSdk>) -> Engine {
    Engine::new(sdk.clone(), fast_config()).expect("engine should start")
}

async fn wait_for_session(engine: &Engine, want: SessionState) {
    let mut rx = engine.watch_session();
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == want))
        .await
        .expect("session state not reached in time")
        .expect("session watch closed");
}

/// Transfer handles are released just after listeners run, so give the callback
/// context a moment to finish.
async fn assert_no_outstanding_objects(sdk: &MockSdk) {
    for _ in 0..100 {
        if sdk.outstanding_objects().is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("objects never released: {:?}", sdk.outstanding_objects());
}

#[tokio::test]
async fn test_connect_capture_and_disconnect() {
    let sdk = Arc::new(MockSdk::with_cameras(0));
    let engine = start(&sdk);

    let err = engine.connect(None).await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::DeviceNotFound));
    assert_eq!(engine.session_state(), SessionState::Closed);

    // Camera plugged in, but still busy for the first two attempts.
    sdk.set_camera_count(1);
    sdk.fail_next(SdkOp::OpenSession, sys::EDS_ERR_DEVICE_BUSY, 2);
    engine.connect(None).await.unwrap();
    assert_eq!(engine.session_state(), SessionState::Open);
    assert_eq!(sdk.call_count(SdkOp::OpenSession), 3);
    assert_eq!(
        sdk.property_value(PropertyId::SAVE_TO),
        Some(PropertyValue::UInt32(sys::kEdsSaveTo_Host))
    );

    let image = engine.capture(Duration::from_secs(2)).await.unwrap();
    assert!(image.file_name.ends_with(".JPG"));
    assert!(!image.data.is_empty());
    assert_eq!(sdk.call_count(SdkOp::Download), 1);
    assert_eq!(sdk.call_count(SdkOp::DownloadComplete), 1);
    assert_no_outstanding_objects(&sdk).await;

    engine.disconnect().await.unwrap();
    assert_eq!(engine.session_state(), SessionState::Closed);
    engine.shutdown().await.unwrap();
    assert!(!sdk.is_initialized());
}

#[tokio::test]
async fn test_connect_rejected_while_opening() {
    let sdk = Arc::new(MockSdk::new());
    sdk.set_latency(SdkOp::OpenSession, Duration::from_millis(200));
    let engine = start(&sdk);

    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.connect(None).await }
    });
    wait_for_session(&engine, SessionState::Opening).await;

    let err = engine.connect(None).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidSessionState {
            found: "opening",
            ..
        }
    ));

    first.await.unwrap().unwrap();
    assert_eq!(sdk.call_count(SdkOp::OpenSession), 1);
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_stops_live_view_before_closing() {
    let sdk = Arc::new(MockSdk::new());
    let engine = start(&sdk);
    engine.connect(None).await.unwrap();
    engine.start_live_view().await.unwrap();
    assert_eq!(engine.live_view().state, LiveViewState::Active);

    sdk.clear_calls();
    sdk.fail_next(SdkOp::CloseSession, sys::EDS_ERR_COMM_DISCONNECTED, 1);
    let err = engine.disconnect().await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Communication));
    assert_eq!(engine.session_state(), SessionState::Closed);
    assert_eq!(engine.live_view().state, LiveViewState::Inactive);

    let calls = sdk.calls();
    let evf_off = calls
        .iter()
        .position(|c| {
            *c == SdkCall::SetProperty(PropertyId::EVF_OUTPUT_DEVICE, PropertyValue::UInt32(0))
        })
        .expect("live view was not turned off");
    let close = calls
        .iter()
        .position(|c| matches!(c, SdkCall::CloseSession(_)))
        .expect("session was not closed");
    assert!(evf_off < close);
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_live_view_operations_require_active() {
    let sdk = Arc::new(MockSdk::new());
    let engine = start(&sdk);
    engine.connect(None).await.unwrap();
    sdk.clear_calls();

    assert!(matches!(
        engine.download_frame().await,
        Err(EngineError::LiveViewNotActive)
    ));
    assert!(matches!(
        engine.set_zoom(Zoom::X5).await,
        Err(EngineError::LiveViewNotActive)
    ));
    assert!(matches!(
        engine.execute(engine.command(Operation::DoEvfAf(true))).await,
        Err(EngineError::LiveViewNotActive)
    ));
    // Only the background event pump may have reached the SDK.
    assert!(sdk.calls().iter().all(|c| *c == SdkCall::PumpEvents));

    engine.start_live_view().await.unwrap();
    engine.set_zoom(Zoom::X5).await.unwrap();
    engine.autofocus_at(100, 200).await.unwrap();
    let first = engine.download_frame().await.unwrap();
    let second = engine.download_frame().await.unwrap();
    assert!(second.sequence > first.sequence);
    assert_eq!(engine.live_view().zoom, Zoom::X5);

    engine.stop_live_view().await.unwrap();
    assert!(sdk.outstanding_objects().is_empty());
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_transfer_is_cancelled_and_released() {
    let sdk = Arc::new(MockSdk::new());
    let engine = start(&sdk);
    engine.connect(None).await.unwrap();
    sdk.fail_next(SdkOp::Download, sys::EDS_ERR_FILE_IO_ERROR, 1);

    let err = engine.capture(Duration::from_secs(2)).await.unwrap_err();
    assert!(matches!(err, EngineError::TransferFailed(_)));
    assert_eq!(sdk.call_count(SdkOp::DownloadCancel), 1);
    assert_eq!(sdk.call_count(SdkOp::DownloadComplete), 0);
    assert_no_outstanding_objects(&sdk).await;
    assert!(sdk.released_twice().is_empty());

    // The next capture is unaffected.
    engine.capture(Duration::from_secs(2)).await.unwrap();
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_slow_command_times_out_and_queue_recovers() {
    let sdk = Arc::new(MockSdk::new());
    let mut config = fast_config();
    config.dispatch.command_timeout_ms = 100;
    let engine = Engine::new(sdk.clone(), config).unwrap();
    engine.connect(None).await.unwrap();

    sdk.set_latency(SdkOp::GetProperty, Duration::from_millis(300));
    let err = engine.get_property(PropertyId::ISO_SPEED).await.unwrap_err();
    assert!(matches!(err, EngineError::Timeout(_)));

    sdk.set_latency(SdkOp::GetProperty, Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(300)).await;
    engine
        .set_property(PropertyId::ISO_SPEED, PropertyValue::UInt32(0x58))
        .await
        .unwrap();
    assert_eq!(
        engine.get_property(PropertyId::ISO_SPEED).await.unwrap(),
        PropertyValue::UInt32(0x58)
    );
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancelled_ticket_never_reaches_device() {
    let sdk = Arc::new(MockSdk::new());
    let engine = start(&sdk);
    engine.connect(None).await.unwrap();
    sdk.set_latency(SdkOp::SetProperty, Duration::from_millis(100));

    let slow = engine
        .submit(engine.command(Operation::SetProperty {
            property: PropertyId::AV,
            param: 0,
            value: PropertyValue::UInt32(0x30),
        }))
        .await
        .unwrap();
    let queued = engine
        .submit(engine.command(Operation::TakePicture))
        .await
        .unwrap();
    queued.cancel();

    slow.wait().await.unwrap();
    assert!(matches!(queued.wait().await, Err(EngineError::Cancelled)));
    assert_eq!(sdk.call_count(SdkOp::SendCommand), 0);
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_frame_stream_ends_when_live_view_stops() {
    let sdk = Arc::new(MockSdk::new());
    let engine = start(&sdk);
    engine.connect(None).await.unwrap();

    let (mut frames, guard) = engine.stream_frames(50.0).await.unwrap();
    let first = frames.recv().await.unwrap();
    let second = frames.recv().await.unwrap();
    assert!(second.sequence > first.sequence);
    assert!(guard.is_running());

    engine.stop_live_view().await.unwrap();
    let drained = tokio::time::timeout(Duration::from_secs(2), async {
        while frames.recv().await.is_some() {}
    })
    .await;
    assert!(drained.is_ok(), "frame stream did not end");
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_extreme_frame_rates_keep_engine_alive() {
    let sdk = Arc::new(MockSdk::new());
    let engine = start(&sdk);
    engine.connect(None).await.unwrap();

    // Vanishingly small rate: pacing clamps to an hour, the first tick is immediate.
    let (mut frames, guard) = engine.stream_frames(1e-30).await.unwrap();
    assert_eq!(engine.live_view().frame_interval, Duration::from_secs(3600));
    frames.recv().await.unwrap();
    assert!(guard.is_running());
    drop(guard);

    // Absurdly high rate: pacing clamps to 1 ms instead of a zero interval.
    let (mut frames, guard) = engine.stream_frames(1e12).await.unwrap();
    assert_eq!(engine.live_view().frame_interval, Duration::from_millis(1));
    let first = frames.recv().await.unwrap();
    let second = frames.recv().await.unwrap();
    assert!(second.sequence > first.sequence);
    assert!(guard.is_running());
    drop(guard);

    engine.take_picture().await.unwrap();
    assert_eq!(engine.session_state(), SessionState::Open);
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_camera_shutdown_event_closes_session() {
    let sdk = Arc::new(MockSdk::new());
    let engine = start(&sdk);
    engine.connect(None).await.unwrap();
    engine.start_live_view().await.unwrap();

    sdk.emit_state_event(sys::kEdsStateEvent_Shutdown, 0);
    wait_for_session(&engine, SessionState::Closed).await;
    assert_eq!(engine.live_view().state, LiveViewState::Inactive);

    // A fresh session can be opened afterwards.
    engine.connect(None).await.unwrap();
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failing_listener_does_not_block_capture() {
    let sdk = Arc::new(MockSdk::new());
    let engine = start(&sdk);
    engine.connect(None).await.unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    engine.subscribe(
        EventKind::ObjectAdded,
        Arc::new(FnListener::new(|_| anyhow::bail!("listener exploded"))),
    );
    let counter = seen.clone();
    let id = engine.subscribe_all(Arc::new(FnListener::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })));

    engine.capture(Duration::from_secs(2)).await.unwrap();
    assert!(seen.load(Ordering::SeqCst) >= 1);
    assert!(engine.unsubscribe(id));
    assert!(!engine.unsubscribe(id));
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_handles_fail_after_shutdown() {
    let sdk = Arc::new(MockSdk::new());
    let engine = start(&sdk);
    let other = engine.clone();
    engine.connect(None).await.unwrap();

    engine.shutdown().await.unwrap();
    assert!(!sdk.is_session_open(eos_tether::hardware::DeviceHandle(1)));
    assert!(matches!(
        other.take_picture().await,
        Err(EngineError::DispatcherClosed)
    ));
    // Shutting down twice is harmless.
    other.shutdown().await.unwrap();
}
