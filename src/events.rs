//! Camera event dispatch.
//!
//! The SDK calls back on its own context (often from inside `EdsGetEvent` on the
//! dispatch worker, sometimes from an SDK thread). [`EventDispatcher`] turns each
//! native callback into exactly one [`EventRecord`] and hands it to every matching
//! listener, in registration order, before returning to the SDK.
//!
//! Listeners run synchronously inside the SDK callback. A listener that blocks
//! stalls event delivery for the whole device, and it must not wait on the engine's
//! command queue from inside a callback.

use crate::hardware::{
    CameraSdk, HandleRegistry, NativeEvent, NativeEventSink, ObjectRef, PropertyId,
    ScopedHandle,
};
use crate::error::{EngineError, EngineResult};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use edsdk_sys as sys;
use parking_lot::{ReentrantMutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Listener filter, one per native callback family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Property and property-description events
    PropertyChanged,
    /// Object events, including transfer requests
    ObjectAdded,
    /// Camera state events
    CameraStateChanged,
}

/// File pulled from the camera in response to a transfer request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    /// Name on the camera's card
    pub file_name: String,
    /// File contents
    pub data: Bytes,
}

/// Result of the synchronous transfer made for an object event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The event did not ask for a transfer.
    NotRequested,
    /// Downloaded and acknowledged to the camera.
    Downloaded(CapturedImage),
    /// The transfer was attempted and dropped.
    Failed(String),
}

/// Event details by family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// A property event
    Property {
        /// `kEdsPropertyEvent_*` id
        event: u32,
        /// Affected property
        property: PropertyId,
        /// Property parameter
        param: u32,
    },
    /// `object` is only valid while listeners run; it is released right after.
    Object {
        /// `kEdsObjectEvent_*` id
        event: u32,
        /// Object the event refers to
        object: ObjectRef,
        /// What happened to the file, for transfer requests
        transfer: TransferOutcome,
    },
    /// A camera state event
    State {
        /// `kEdsStateEvent_*` id
        event: u32,
        /// Event-specific parameter
        param: u32,
    },
}

/// One delivered event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Arrival order across all kinds, from 1.
    pub sequence: u64,
    /// Family, as used for filtering
    pub kind: EventKind,
    /// Event details
    pub payload: EventPayload,
    /// Host time of arrival
    pub arrived_at: DateTime<Utc>,
}

impl EventRecord {
    /// The downloaded image, if this record carries one.
    pub fn captured_image(&self) -> Option<&CapturedImage> {
        match &self.payload {
            EventPayload::Object {
                transfer: TransferOutcome::Downloaded(image),
                ..
            } => Some(image),
            _ => None,
        }
    }

    /// Whether the camera reported it is shutting down or was unplugged.
    pub fn is_shutdown(&self) -> bool {
        matches!(
            self.payload,
            EventPayload::State { event, .. } if event == sys::kEdsStateEvent_Shutdown
        )
    }
}

/// Receiver of camera events. Every method defaults to doing nothing.
///
/// Errors and panics are caught by the dispatcher and logged; they never stop
/// delivery to the other listeners.
pub trait CameraEventListener: Send + Sync {
    /// A property value or its allowed values changed.
    fn on_property_changed(&self, _record: &EventRecord) -> anyhow::Result<()> {
        Ok(())
    }

    /// An object event arrived. Transfer requests have already been handled.
    fn on_object_added(&self, _record: &EventRecord) -> anyhow::Result<()> {
        Ok(())
    }

    /// The camera changed state.
    fn on_state_changed(&self, _record: &EventRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Logs every event at info level.
#[derive(Debug, Default)]
pub struct LoggingListener;

impl CameraEventListener for LoggingListener {
    fn on_property_changed(&self, record: &EventRecord) -> anyhow::Result<()> {
        if let EventPayload::Property { property, .. } = &record.payload {
            info!(seq = record.sequence, "Property changed: {}", property);
        }
        Ok(())
    }

    fn on_object_added(&self, record: &EventRecord) -> anyhow::Result<()> {
        match &record.payload {
            EventPayload::Object {
                event,
                transfer: TransferOutcome::Downloaded(image),
                ..
            } => info!(
                seq = record.sequence,
                "Object event 0x{:X}: downloaded {} ({} bytes)",
                event,
                image.file_name,
                image.data.len()
            ),
            EventPayload::Object { event, .. } => {
                info!(seq = record.sequence, "Object event 0x{:X}", event)
            }
            _ => {}
        }
        Ok(())
    }

    fn on_state_changed(&self, record: &EventRecord) -> anyhow::Result<()> {
        if let EventPayload::State { event, param } = &record.payload {
            info!(seq = record.sequence, "Camera state 0x{:X} ({})", event, param);
        }
        Ok(())
    }
}

/// Fans events out on a tokio broadcast channel, e.g. to a GUI.
#[derive(Debug, Clone)]
pub struct BroadcastListener {
    tx: broadcast::Sender<EventRecord>,
}

impl BroadcastListener {
    /// Listener plus a first receiver. Slow receivers lag after `capacity` records.
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<EventRecord>) {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Another receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.tx.subscribe()
    }

    fn publish(&self, record: &EventRecord) -> anyhow::Result<()> {
        // No receivers is not an error: observers come and go.
        let _ = self.tx.send(record.clone());
        Ok(())
    }
}

impl CameraEventListener for BroadcastListener {
    fn on_property_changed(&self, record: &EventRecord) -> anyhow::Result<()> {
        self.publish(record)
    }

    fn on_object_added(&self, record: &EventRecord) -> anyhow::Result<()> {
        self.publish(record)
    }

    fn on_state_changed(&self, record: &EventRecord) -> anyhow::Result<()> {
        self.publish(record)
    }
}

/// Closure listener, called for every kind it is subscribed to.
pub struct FnListener<F> {
    f: F,
}

impl<F> FnListener<F>
where
    F: Fn(&EventRecord) -> anyhow::Result<()> + Send + Sync,
{
    /// Wrap `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> CameraEventListener for FnListener<F>
where
    F: Fn(&EventRecord) -> anyhow::Result<()> + Send + Sync,
{
    fn on_property_changed(&self, record: &EventRecord) -> anyhow::Result<()> {
        (self.f)(record)
    }

    fn on_object_added(&self, record: &EventRecord) -> anyhow::Result<()> {
        (self.f)(record)
    }

    fn on_state_changed(&self, record: &EventRecord) -> anyhow::Result<()> {
        (self.f)(record)
    }
}

/// Forwards transfer results. Failed transfers arrive as `Err`.
#[derive(Debug, Clone)]
pub struct CaptureListener {
    tx: mpsc::UnboundedSender<Result<CapturedImage, String>>,
}

impl CaptureListener {
    /// Listener plus the receiver of transfer results.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Result<CapturedImage, String>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl CameraEventListener for CaptureListener {
    fn on_object_added(&self, record: &EventRecord) -> anyhow::Result<()> {
        let result = match &record.payload {
            EventPayload::Object {
                transfer: TransferOutcome::Downloaded(image),
                ..
            } => Ok(image.clone()),
            EventPayload::Object {
                transfer: TransferOutcome::Failed(reason),
                ..
            } => Err(reason.clone()),
            _ => return Ok(()),
        };
        self.tx
            .send(result)
            .map_err(|_| anyhow::anyhow!("capture receiver dropped"))
    }
}

/// Token returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Registration {
    id: SubscriptionId,
    filter: Option<EventKind>,
    listener: Arc<dyn CameraEventListener>,
}

/// Turns native callbacks into [`EventRecord`]s and delivers them to listeners in
/// registration order. Transfer requests are downloaded before listeners run.
pub struct EventDispatcher {
    sdk: Arc<dyn CameraSdk>,
    registry: Arc<HandleRegistry>,
    listeners: RwLock<Vec<Arc<Registration>>>,
    // Held for a whole delivery so records reach listeners in arrival order.
    // Reentrant: a transfer may itself trigger a nested callback on this thread.
    delivery: ReentrantMutex<()>,
    next_id: AtomicU64,
    sequence: AtomicU64,
}

impl EventDispatcher {
    /// Dispatcher with no listeners.
    pub fn new(sdk: Arc<dyn CameraSdk>, registry: Arc<HandleRegistry>) -> Arc<Self> {
        Arc::new(Self {
            sdk,
            registry,
            listeners: RwLock::new(Vec::new()),
            delivery: ReentrantMutex::new(()),
            next_id: AtomicU64::new(1),
            sequence: AtomicU64::new(0),
        })
    }

    /// Register `listener` for one kind of event.
    pub fn subscribe(
        &self,
        kind: EventKind,
        listener: Arc<dyn CameraEventListener>,
    ) -> SubscriptionId {
        self.register(Some(kind), listener)
    }

    /// Register `listener` for every kind of event.
    pub fn subscribe_all(&self, listener: Arc<dyn CameraEventListener>) -> SubscriptionId {
        self.register(None, listener)
    }

    fn register(
        &self,
        filter: Option<EventKind>,
        listener: Arc<dyn CameraEventListener>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push(Arc::new(Registration {
            id,
            filter,
            listener,
        }));
        debug!(?id, ?filter, "Listener subscribed");
        id
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        before != listeners.len()
    }

    /// Number of active subscriptions.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver one native event to all matching listeners.
    pub fn dispatch(&self, event: NativeEvent) {
        let _delivery = self.delivery.lock();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let arrived_at = Utc::now();

        // Owned until every listener has seen the record.
        let mut _object_guard: Option<ScopedHandle> = None;

        let (kind, payload) = match event {
            NativeEvent::Property {
                event,
                property,
                param,
            } => (
                EventKind::PropertyChanged,
                EventPayload::Property {
                    event,
                    property,
                    param,
                },
            ),
            NativeEvent::Object { event, object } => {
                let item = self.registry.adopt("directory item", object);
                let transfer = if event == sys::kEdsObjectEvent_DirItemRequestTransfer {
                    match self.transfer(&item) {
                        Ok(image) => {
                            info!(
                                file = %image.file_name,
                                bytes = image.data.len(),
                                "Transferred image to host"
                            );
                            TransferOutcome::Downloaded(image)
                        }
                        Err(e) => {
                            warn!(object = %object, "Image transfer dropped: {}", e);
                            TransferOutcome::Failed(e.to_string())
                        }
                    }
                } else {
                    TransferOutcome::NotRequested
                };
                _object_guard = Some(item);
                (
                    EventKind::ObjectAdded,
                    EventPayload::Object {
                        event,
                        object,
                        transfer,
                    },
                )
            }
            NativeEvent::State { event, param } => (
                EventKind::CameraStateChanged,
                EventPayload::State { event, param },
            ),
        };

        let record = EventRecord {
            sequence,
            kind,
            payload,
            arrived_at,
        };
        debug!(seq = sequence, ?kind, "Dispatching event");

        let listeners: Vec<Arc<Registration>> = self.listeners.read().clone();
        for registration in listeners
            .iter()
            .filter(|r| r.filter.map_or(true, |k| k == kind))
        {
            let listener = &registration.listener;
            let outcome = catch_unwind(AssertUnwindSafe(|| match kind {
                EventKind::PropertyChanged => listener.on_property_changed(&record),
                EventKind::ObjectAdded => listener.on_object_added(&record),
                EventKind::CameraStateChanged => listener.on_state_changed(&record),
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(
                    subscription = ?registration.id,
                    seq = sequence,
                    "Event listener failed: {:#}",
                    e
                ),
                Err(_) => error!(
                    subscription = ?registration.id,
                    seq = sequence,
                    "Event listener panicked"
                ),
            }
        }
    }

    /// Pull a requested file to host memory: info, stream, download, complete.
    fn transfer(&self, item: &ScopedHandle) -> EngineResult<CapturedImage> {
        let info = match self.sdk.directory_item_info(item.raw()) {
            Ok(info) => info,
            Err(e) => {
                self.cancel_download(item);
                return Err(e.into());
            }
        };
        let stream = match self
            .registry
            .acquire("transfer stream", |sdk| sdk.create_memory_stream(info.size))
        {
            Ok(stream) => stream,
            Err(e) => {
                self.cancel_download(item);
                return Err(e.into());
            }
        };
        if let Err(e) = self.sdk.download(item.raw(), info.size, stream.raw()) {
            self.cancel_download(item);
            return Err(e.into());
        }
        self.sdk.download_complete(item.raw())?;
        let data = self.sdk.stream_bytes(stream.raw())?;
        if data.is_empty() {
            return Err(EngineError::TransferFailed(format!(
                "{} downloaded empty",
                info.file_name
            )));
        }
        Ok(CapturedImage {
            file_name: info.file_name,
            data: Bytes::from(data),
        })
    }

    fn cancel_download(&self, item: &ScopedHandle) {
        if let Err(e) = self.sdk.download_cancel(item.raw()) {
            warn!(object = %item.raw(), "Failed to cancel download: {}", e);
        }
    }
}

impl NativeEventSink for EventDispatcher {
    fn deliver(&self, event: NativeEvent) {
        self.dispatch(event);
    }
}
