//! Simulated camera SDK.
//!
//! Behaves like one or more cameras attached to the vendor library closely enough
//! for the engine to run end to end without hardware:
//! - sessions must be opened before device calls succeed
//! - taking a picture queues a transfer request, delivered on the next `pump_events`
//! - setting a property queues a property-changed notification
//! - live-view frames are only ready while the EVF output device includes the PC
//!
//! Tests drive it through the recording and scripting helpers: [`MockSdk::calls`],
//! [`MockSdk::fail_next`], [`MockSdk::set_latency`], [`MockSdk::outstanding_objects`].

use super::{
    CameraInfo, CameraSdk, Capacity, DeviceHandle, DirectoryItemInfo, NativeEvent,
    NativeEventSink, ObjectRef, PropertyId, PropertyValue,
};
use crate::error::{SdkError, SdkResult};
use edsdk_sys as sys;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Native entry points, for counting and scripting. One variant per
/// [`CameraSdk`] method.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdkOp {
    Initialize,
    Terminate,
    EnumerateCameras,
    OpenSession,
    CloseSession,
    SendCommand,
    GetProperty,
    SetProperty,
    GetPropertyDesc,
    SetCapacity,
    DirectoryItemInfo,
    CreateMemoryStream,
    Download,
    DownloadComplete,
    DownloadCancel,
    StreamBytes,
    CreateEvfImageRef,
    DownloadEvfImage,
    Release,
    SetEventSink,
    PumpEvents,
}

/// One recorded native call with the arguments tests care about. Variants mirror
/// [`SdkOp`].
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkCall {
    Initialize,
    Terminate,
    EnumerateCameras,
    OpenSession(DeviceHandle),
    CloseSession(DeviceHandle),
    SendCommand { command: u32, param: i32 },
    GetProperty(PropertyId),
    SetProperty(PropertyId, PropertyValue),
    GetPropertyDesc(PropertyId),
    SetCapacity(Capacity),
    DirectoryItemInfo(ObjectRef),
    CreateMemoryStream(u64),
    Download(ObjectRef),
    DownloadComplete(ObjectRef),
    DownloadCancel(ObjectRef),
    StreamBytes(ObjectRef),
    CreateEvfImageRef(ObjectRef),
    DownloadEvfImage(ObjectRef),
    Release(ObjectRef),
    SetEventSink { registered: bool },
    PumpEvents,
}

impl SdkCall {
    /// Entry point this call went through.
    pub fn op(&self) -> SdkOp {
        match self {
            SdkCall::Initialize => SdkOp::Initialize,
            SdkCall::Terminate => SdkOp::Terminate,
            SdkCall::EnumerateCameras => SdkOp::EnumerateCameras,
            SdkCall::OpenSession(_) => SdkOp::OpenSession,
            SdkCall::CloseSession(_) => SdkOp::CloseSession,
            SdkCall::SendCommand { .. } => SdkOp::SendCommand,
            SdkCall::GetProperty(_) => SdkOp::GetProperty,
            SdkCall::SetProperty(..) => SdkOp::SetProperty,
            SdkCall::GetPropertyDesc(_) => SdkOp::GetPropertyDesc,
            SdkCall::SetCapacity(_) => SdkOp::SetCapacity,
            SdkCall::DirectoryItemInfo(_) => SdkOp::DirectoryItemInfo,
            SdkCall::CreateMemoryStream(_) => SdkOp::CreateMemoryStream,
            SdkCall::Download(_) => SdkOp::Download,
            SdkCall::DownloadComplete(_) => SdkOp::DownloadComplete,
            SdkCall::DownloadCancel(_) => SdkOp::DownloadCancel,
            SdkCall::StreamBytes(_) => SdkOp::StreamBytes,
            SdkCall::CreateEvfImageRef(_) => SdkOp::CreateEvfImageRef,
            SdkCall::DownloadEvfImage(_) => SdkOp::DownloadEvfImage,
            SdkCall::Release(_) => SdkOp::Release,
            SdkCall::SetEventSink { .. } => SdkOp::SetEventSink,
            SdkCall::PumpEvents => SdkOp::PumpEvents,
        }
    }
}

#[derive(Debug)]
enum MockObject {
    Stream { data: Vec<u8> },
    EvfImage { stream: ObjectRef },
    DirectoryItem { name: String, data: Vec<u8> },
}

#[derive(Debug)]
struct ScriptedFailure {
    status: u32,
    remaining: u32,
}

struct MockState {
    initialized: bool,
    cameras: Vec<CameraInfo>,
    open_sessions: HashSet<DeviceHandle>,
    properties: HashMap<PropertyId, PropertyValue>,
    descs: HashMap<PropertyId, Vec<i32>>,
    objects: BTreeMap<ObjectRef, MockObject>,
    released: HashSet<ObjectRef>,
    double_released: Vec<ObjectRef>,
    next_object: usize,
    next_image: u32,
    frames_served: u64,
    calls: Vec<SdkCall>,
    failures: HashMap<SdkOp, VecDeque<ScriptedFailure>>,
    latency: HashMap<SdkOp, Duration>,
    sink: Option<Arc<dyn NativeEventSink>>,
    pending: VecDeque<NativeEvent>,
}

impl MockState {
    fn new() -> Self {
        let mut state = Self {
            initialized: false,
            cameras: Vec::new(),
            open_sessions: HashSet::new(),
            properties: default_properties(),
            descs: default_descs(),
            objects: BTreeMap::new(),
            released: HashSet::new(),
            double_released: Vec::new(),
            next_object: 0x1000,
            next_image: 1,
            frames_served: 0,
            calls: Vec::new(),
            failures: HashMap::new(),
            latency: HashMap::new(),
            sink: None,
            pending: VecDeque::new(),
        };
        state.set_camera_count(1);
        state
    }

    fn set_camera_count(&mut self, count: usize) {
        self.cameras = (0..count)
            .map(|i| CameraInfo {
                handle: DeviceHandle(i + 1),
                description: format!("Canon EOS Mock {}", i + 1),
                port_name: format!("usb:mock{}", i + 1),
            })
            .collect();
    }

    fn alloc(&mut self, object: MockObject) -> ObjectRef {
        let raw = ObjectRef(self.next_object);
        self.next_object += 0x10;
        self.objects.insert(raw, object);
        raw
    }

    fn scripted_failure(&mut self, op: SdkOp) -> Option<u32> {
        let queue = self.failures.get_mut(&op)?;
        let front = queue.front_mut()?;
        let status = front.status;
        front.remaining = front.remaining.saturating_sub(1);
        if front.remaining == 0 {
            queue.pop_front();
        }
        Some(status)
    }

    fn require_session(&self, device: DeviceHandle, context: &str) -> SdkResult<()> {
        if !self.cameras.iter().any(|c| c.handle == device) {
            return Err(SdkError::from_status(sys::EDS_ERR_DEVICE_NOT_FOUND, context));
        }
        if !self.open_sessions.contains(&device) {
            return Err(SdkError::from_status(sys::EDS_ERR_SESSION_NOT_OPEN, context));
        }
        Ok(())
    }

    fn evf_to_pc(&self) -> bool {
        self.properties
            .get(&PropertyId::EVF_OUTPUT_DEVICE)
            .and_then(PropertyValue::as_u32)
            .is_some_and(|v| v & sys::kEdsEvfOutputDevice_PC != 0)
    }
}

fn default_properties() -> HashMap<PropertyId, PropertyValue> {
    use PropertyValue::*;
    HashMap::from([
        (PropertyId::PRODUCT_NAME, String("Canon EOS Mock".to_owned())),
        (PropertyId::BATTERY_LEVEL, UInt32(100)),
        (PropertyId::SAVE_TO, UInt32(sys::kEdsSaveTo_Camera)),
        (PropertyId::IMAGE_QUALITY, UInt32(0x0013_FF0F)),
        (PropertyId::AE_MODE, UInt32(2)),
        (PropertyId::AE_MODE_SELECT, UInt32(2)),
        (PropertyId::ISO_SPEED, UInt32(0x48)),
        (PropertyId::METERING_MODE, UInt32(3)),
        (PropertyId::AV, UInt32(0x30)),
        (PropertyId::TV, UInt32(0x60)),
        (PropertyId::EXPOSURE_COMPENSATION, UInt32(0)),
        (PropertyId::AVAILABLE_SHOTS, UInt32(999)),
        (PropertyId::EVF_OUTPUT_DEVICE, UInt32(sys::kEdsEvfOutputDevice_TFT)),
        (PropertyId::EVF_MODE, UInt32(0)),
        (PropertyId::EVF_DEPTH_OF_FIELD_PREVIEW, UInt32(0)),
        (PropertyId::EVF_ZOOM, UInt32(sys::kEdsEvfZoom_Fit)),
        (PropertyId::EVF_ZOOM_POSITION, Point { x: 0, y: 0 }),
        (PropertyId::EVF_AF_MODE, UInt32(0)),
    ])
}

fn default_descs() -> HashMap<PropertyId, Vec<i32>> {
    HashMap::from([
        (PropertyId::ISO_SPEED, vec![0x00, 0x48, 0x50, 0x58, 0x60, 0x68, 0x70]),
        (PropertyId::AV, vec![0x20, 0x25, 0x28, 0x30, 0x38, 0x40, 0x48, 0x50]),
        (PropertyId::TV, vec![0x10, 0x30, 0x50, 0x60, 0x70, 0x80, 0x90, 0xA0]),
        (PropertyId::EXPOSURE_COMPENSATION, vec![0xF0, 0xF8, 0x00, 0x08, 0x10]),
        (PropertyId::METERING_MODE, vec![1, 3, 4, 5]),
        (PropertyId::EVF_AF_MODE, vec![0, 1, 2]),
    ])
}

fn jpeg_like(tag: &[u8], len: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(len.max(tag.len() + 4));
    data.extend_from_slice(&[0xFF, 0xD8]);
    data.extend_from_slice(tag);
    while data.len() + 2 < len {
        data.push((data.len() % 251) as u8);
    }
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}

/// Simulated camera SDK.
pub struct MockSdk {
    state: Mutex<MockState>,
}

impl Default for MockSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSdk {
    /// One camera attached.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::new()),
        }
    }

    /// `count` cameras attached, with handles 1..=count.
    pub fn with_cameras(count: usize) -> Self {
        let sdk = Self::new();
        sdk.set_camera_count(count);
        sdk
    }

    /// Plug or unplug cameras.
    pub fn set_camera_count(&self, count: usize) {
        self.state.lock().set_camera_count(count);
    }

    /// Make the next `times` calls of `op` fail with `status`.
    /// Queued scripts are consumed in the order they were added.
    pub fn fail_next(&self, op: SdkOp, status: u32, times: u32) {
        if times == 0 {
            return;
        }
        self.state
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(ScriptedFailure {
                status,
                remaining: times,
            });
    }

    /// Drop all scripted failures.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Make every call of `op` take at least `delay`.
    pub fn set_latency(&self, op: SdkOp, delay: Duration) {
        self.state.lock().latency.insert(op, delay);
    }

    /// Seed a property without recording a call.
    pub fn set_property_value(&self, property: PropertyId, value: PropertyValue) {
        self.state.lock().properties.insert(property, value);
    }

    /// Current simulated value.
    pub fn property_value(&self, property: PropertyId) -> Option<PropertyValue> {
        self.state.lock().properties.get(&property).cloned()
    }

    /// Every recorded call, oldest first.
    pub fn calls(&self) -> Vec<SdkCall> {
        self.state.lock().calls.clone()
    }

    /// How many times `op` was called.
    pub fn call_count(&self, op: SdkOp) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.op() == op)
            .count()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Objects handed out and not yet released.
    pub fn outstanding_objects(&self) -> Vec<ObjectRef> {
        self.state.lock().objects.keys().copied().collect()
    }

    /// Objects released more than once.
    pub fn released_twice(&self) -> Vec<ObjectRef> {
        self.state.lock().double_released.clone()
    }

    /// Whether `device` has an open session.
    pub fn is_session_open(&self, device: DeviceHandle) -> bool {
        self.state.lock().open_sessions.contains(&device)
    }

    /// Between `initialize` and `terminate`.
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Events waiting for the next `pump_events`.
    pub fn pending_events(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Deliver an object event immediately on the calling thread, as a camera
    /// writing a new file would. The created directory item is owned by the sink.
    pub fn emit_object_event(&self, event: u32) -> ObjectRef {
        let (object, sink) = {
            let mut state = self.state.lock();
            let n = state.next_image;
            state.next_image += 1;
            let name = format!("IMG_{n:04}.JPG");
            let data = jpeg_like(name.as_bytes(), 4096);
            let object = state.alloc(MockObject::DirectoryItem { name, data });
            (object, state.sink.clone())
        };
        match sink {
            Some(sink) => sink.deliver(NativeEvent::Object { event, object }),
            // Nobody to take ownership; the SDK drops its own reference.
            None => self.drop_object(object),
        }
        object
    }

    /// Deliver a property-changed event to the registered sink immediately.
    pub fn emit_property_event(&self, property: PropertyId) {
        self.emit(NativeEvent::Property {
            event: sys::kEdsPropertyEvent_PropertyChanged,
            property,
            param: 0,
        });
    }

    /// Deliver a state event, e.g. `kEdsStateEvent_Shutdown`, immediately.
    pub fn emit_state_event(&self, event: u32, param: u32) {
        self.emit(NativeEvent::State { event, param });
    }

    fn emit(&self, event: NativeEvent) {
        let sink = self.state.lock().sink.clone();
        if let Some(sink) = sink {
            sink.deliver(event);
        }
    }

    fn drop_object(&self, object: ObjectRef) {
        let mut state = self.state.lock();
        state.objects.remove(&object);
        state.released.insert(object);
    }

    /// Record the call, apply latency and any scripted failure.
    fn enter(&self, call: SdkCall) -> SdkResult<()> {
        let op = call.op();
        let (delay, failure) = {
            let mut state = self.state.lock();
            state.calls.push(call);
            (state.latency.get(&op).copied(), state.scripted_failure(op))
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        match failure {
            Some(status) => Err(SdkError::from_status(status, format!("{op:?}"))),
            None => Ok(()),
        }
    }
}

impl CameraSdk for MockSdk {
    fn initialize(&self) -> SdkResult<()> {
        self.enter(SdkCall::Initialize)?;
        self.state.lock().initialized = true;
        tracing::info!("Mock camera SDK initialized");
        Ok(())
    }

    fn terminate(&self) -> SdkResult<()> {
        self.enter(SdkCall::Terminate)?;
        let mut state = self.state.lock();
        state.initialized = false;
        state.open_sessions.clear();
        state.sink = None;
        Ok(())
    }

    fn enumerate_cameras(&self) -> SdkResult<Vec<CameraInfo>> {
        self.enter(SdkCall::EnumerateCameras)?;
        Ok(self.state.lock().cameras.clone())
    }

    fn open_session(&self, device: DeviceHandle) -> SdkResult<()> {
        self.enter(SdkCall::OpenSession(device))?;
        let mut state = self.state.lock();
        if !state.cameras.iter().any(|c| c.handle == device) {
            return Err(SdkError::from_status(
                sys::EDS_ERR_DEVICE_NOT_FOUND,
                "OpenSession",
            ));
        }
        state.open_sessions.insert(device);
        Ok(())
    }

    fn close_session(&self, device: DeviceHandle) -> SdkResult<()> {
        self.enter(SdkCall::CloseSession(device))?;
        let mut state = self.state.lock();
        if !state.open_sessions.remove(&device) {
            return Err(SdkError::from_status(
                sys::EDS_ERR_SESSION_NOT_OPEN,
                "CloseSession",
            ));
        }
        Ok(())
    }

    fn send_command(&self, device: DeviceHandle, command: u32, param: i32) -> SdkResult<()> {
        self.enter(SdkCall::SendCommand { command, param })?;
        let mut state = self.state.lock();
        state.require_session(device, "SendCommand")?;
        match command {
            sys::kEdsCameraCommand_TakePicture => {
                queue_capture(&mut state);
            }
            sys::kEdsCameraCommand_PressShutterButton
                if param == sys::kEdsCameraCommand_ShutterButton_Completely
                    || param == sys::kEdsCameraCommand_ShutterButton_Completely_NonAF =>
            {
                queue_capture(&mut state);
            }
            sys::kEdsCameraCommand_DoEvfAf | sys::kEdsCameraCommand_DriveLensEvf => {
                if !state.evf_to_pc() {
                    return Err(SdkError::from_status(
                        sys::EDS_ERR_INVALID_FN_CALL,
                        "SendCommand",
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn get_property(
        &self,
        device: DeviceHandle,
        property: PropertyId,
        _param: i32,
    ) -> SdkResult<PropertyValue> {
        self.enter(SdkCall::GetProperty(property))?;
        let state = self.state.lock();
        state.require_session(device, "GetProperty")?;
        state.properties.get(&property).cloned().ok_or_else(|| {
            SdkError::from_status(sys::EDS_ERR_PROPERTIES_UNAVAILABLE, "GetProperty")
        })
    }

    fn set_property(
        &self,
        device: DeviceHandle,
        property: PropertyId,
        _param: i32,
        value: &PropertyValue,
    ) -> SdkResult<()> {
        self.enter(SdkCall::SetProperty(property, value.clone()))?;
        let mut state = self.state.lock();
        state.require_session(device, "SetProperty")?;
        state.properties.insert(property, value.clone());
        state.pending.push_back(NativeEvent::Property {
            event: sys::kEdsPropertyEvent_PropertyChanged,
            property,
            param: 0,
        });
        Ok(())
    }

    fn get_property_desc(
        &self,
        device: DeviceHandle,
        property: PropertyId,
    ) -> SdkResult<Vec<i32>> {
        self.enter(SdkCall::GetPropertyDesc(property))?;
        let state = self.state.lock();
        state.require_session(device, "GetPropertyDesc")?;
        Ok(state.descs.get(&property).cloned().unwrap_or_default())
    }

    fn set_capacity(&self, device: DeviceHandle, capacity: Capacity) -> SdkResult<()> {
        self.enter(SdkCall::SetCapacity(capacity))?;
        self.state.lock().require_session(device, "SetCapacity")
    }

    fn directory_item_info(&self, item: ObjectRef) -> SdkResult<DirectoryItemInfo> {
        self.enter(SdkCall::DirectoryItemInfo(item))?;
        match self.state.lock().objects.get(&item) {
            Some(MockObject::DirectoryItem { name, data }) => Ok(DirectoryItemInfo {
                size: data.len() as u64,
                is_folder: false,
                file_name: name.clone(),
            }),
            _ => Err(invalid_handle("DirectoryItemInfo")),
        }
    }

    fn create_memory_stream(&self, size: u64) -> SdkResult<ObjectRef> {
        self.enter(SdkCall::CreateMemoryStream(size))?;
        let mut state = self.state.lock();
        let capacity = usize::try_from(size).unwrap_or(0);
        Ok(state.alloc(MockObject::Stream {
            data: Vec::with_capacity(capacity),
        }))
    }

    fn download(&self, item: ObjectRef, size: u64, stream: ObjectRef) -> SdkResult<()> {
        self.enter(SdkCall::Download(item))?;
        let mut state = self.state.lock();
        let bytes = match state.objects.get(&item) {
            Some(MockObject::DirectoryItem { data, .. }) => {
                let n = usize::try_from(size).unwrap_or(usize::MAX).min(data.len());
                data[..n].to_vec()
            }
            _ => return Err(invalid_handle("Download")),
        };
        match state.objects.get_mut(&stream) {
            Some(MockObject::Stream { data }) => {
                *data = bytes;
                Ok(())
            }
            _ => Err(invalid_handle("Download")),
        }
    }

    fn download_complete(&self, item: ObjectRef) -> SdkResult<()> {
        self.enter(SdkCall::DownloadComplete(item))?;
        match self.state.lock().objects.get(&item) {
            Some(MockObject::DirectoryItem { .. }) => Ok(()),
            _ => Err(invalid_handle("DownloadComplete")),
        }
    }

    fn download_cancel(&self, item: ObjectRef) -> SdkResult<()> {
        self.enter(SdkCall::DownloadCancel(item))?;
        match self.state.lock().objects.get(&item) {
            Some(MockObject::DirectoryItem { .. }) => Ok(()),
            _ => Err(invalid_handle("DownloadCancel")),
        }
    }

    fn stream_bytes(&self, stream: ObjectRef) -> SdkResult<Vec<u8>> {
        self.enter(SdkCall::StreamBytes(stream))?;
        match self.state.lock().objects.get(&stream) {
            Some(MockObject::Stream { data }) => Ok(data.clone()),
            _ => Err(invalid_handle("StreamBytes")),
        }
    }

    fn create_evf_image_ref(&self, stream: ObjectRef) -> SdkResult<ObjectRef> {
        self.enter(SdkCall::CreateEvfImageRef(stream))?;
        let mut state = self.state.lock();
        if !matches!(state.objects.get(&stream), Some(MockObject::Stream { .. })) {
            return Err(invalid_handle("CreateEvfImageRef"));
        }
        Ok(state.alloc(MockObject::EvfImage { stream }))
    }

    fn download_evf_image(&self, device: DeviceHandle, image: ObjectRef) -> SdkResult<()> {
        self.enter(SdkCall::DownloadEvfImage(image))?;
        let mut state = self.state.lock();
        state.require_session(device, "DownloadEvfImage")?;
        if !state.evf_to_pc() {
            return Err(SdkError::from_status(
                sys::EDS_ERR_OBJECT_NOTREADY,
                "DownloadEvfImage",
            ));
        }
        let stream = match state.objects.get(&image) {
            Some(MockObject::EvfImage { stream }) => *stream,
            _ => return Err(invalid_handle("DownloadEvfImage")),
        };
        state.frames_served += 1;
        let frame = jpeg_like(&state.frames_served.to_be_bytes(), 512);
        match state.objects.get_mut(&stream) {
            Some(MockObject::Stream { data }) => {
                *data = frame;
                Ok(())
            }
            _ => Err(invalid_handle("DownloadEvfImage")),
        }
    }

    fn release(&self, object: ObjectRef) -> SdkResult<()> {
        self.enter(SdkCall::Release(object))?;
        let mut state = self.state.lock();
        if state.objects.remove(&object).is_some() {
            state.released.insert(object);
            Ok(())
        } else {
            if state.released.contains(&object) {
                state.double_released.push(object);
            }
            Err(invalid_handle("Release"))
        }
    }

    fn set_event_sink(
        &self,
        device: DeviceHandle,
        sink: Option<Arc<dyn NativeEventSink>>,
    ) -> SdkResult<()> {
        self.enter(SdkCall::SetEventSink {
            registered: sink.is_some(),
        })?;
        let mut state = self.state.lock();
        if !state.cameras.iter().any(|c| c.handle == device) {
            return Err(SdkError::from_status(
                sys::EDS_ERR_DEVICE_NOT_FOUND,
                "SetEventSink",
            ));
        }
        state.sink = sink;
        Ok(())
    }

    fn pump_events(&self) -> SdkResult<()> {
        let (events, sink) = {
            let mut state = self.state.lock();
            if state.pending.is_empty() {
                // Idle pumps are not recorded to keep call logs readable.
                return Ok(());
            }
            state.calls.push(SdkCall::PumpEvents);
            let events: Vec<_> = state.pending.drain(..).collect();
            (events, state.sink.clone())
        };
        match sink {
            Some(sink) => {
                for event in events {
                    sink.deliver(event);
                }
            }
            None => {
                for event in events {
                    if let NativeEvent::Object { object, .. } = event {
                        self.drop_object(object);
                    }
                }
            }
        }
        Ok(())
    }
}

fn queue_capture(state: &mut MockState) {
    let n = state.next_image;
    state.next_image += 1;
    let name = format!("IMG_{n:04}.JPG");
    let data = jpeg_like(name.as_bytes(), 4096);
    let object = state.alloc(MockObject::DirectoryItem { name, data });
    state.pending.push_back(NativeEvent::Object {
        event: sys::kEdsObjectEvent_DirItemRequestTransfer,
        object,
    });
}

fn invalid_handle(context: &str) -> SdkError {
    SdkError::from_status(sys::EDS_ERR_INVALID_HANDLE, context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_failures_are_consumed_in_order() {
        let sdk = MockSdk::new();
        sdk.fail_next(SdkOp::OpenSession, sys::EDS_ERR_DEVICE_BUSY, 2);
        sdk.fail_next(SdkOp::OpenSession, sys::EDS_ERR_COMM_DISCONNECTED, 1);
        let device = DeviceHandle(1);

        assert_eq!(
            sdk.open_session(device).unwrap_err().code,
            sys::EDS_ERR_DEVICE_BUSY
        );
        assert_eq!(
            sdk.open_session(device).unwrap_err().code,
            sys::EDS_ERR_DEVICE_BUSY
        );
        assert_eq!(
            sdk.open_session(device).unwrap_err().code,
            sys::EDS_ERR_COMM_DISCONNECTED
        );
        assert!(sdk.open_session(device).is_ok());
        assert_eq!(sdk.call_count(SdkOp::OpenSession), 4);
    }

    #[test]
    fn test_device_calls_require_session() {
        let sdk = MockSdk::new();
        let err = sdk
            .get_property(DeviceHandle(1), PropertyId::ISO_SPEED, 0)
            .unwrap_err();
        assert_eq!(err.code, sys::EDS_ERR_SESSION_NOT_OPEN);
    }

    #[test]
    fn test_take_picture_queues_transfer_request() {
        let sdk = MockSdk::new();
        let device = DeviceHandle(1);
        sdk.open_session(device).unwrap();
        sdk.send_command(device, sys::kEdsCameraCommand_TakePicture, 0)
            .unwrap();
        assert_eq!(sdk.pending_events(), 1);
        assert_eq!(sdk.outstanding_objects().len(), 1);

        // No sink registered: pumping drops the SDK's own reference.
        sdk.pump_events().unwrap();
        assert!(sdk.outstanding_objects().is_empty());
    }

    #[test]
    fn test_double_release_is_recorded() {
        let sdk = MockSdk::new();
        let stream = sdk.create_memory_stream(0).unwrap();
        sdk.release(stream).unwrap();
        assert!(sdk.release(stream).is_err());
        assert_eq!(sdk.released_twice(), vec![stream]);
    }

    #[test]
    fn test_evf_frame_requires_pc_output() {
        let sdk = MockSdk::new();
        let device = DeviceHandle(1);
        sdk.open_session(device).unwrap();
        let stream = sdk.create_memory_stream(0).unwrap();
        let image = sdk.create_evf_image_ref(stream).unwrap();

        let err = sdk.download_evf_image(device, image).unwrap_err();
        assert_eq!(err.code, sys::EDS_ERR_OBJECT_NOTREADY);

        sdk.set_property(
            device,
            PropertyId::EVF_OUTPUT_DEVICE,
            0,
            &PropertyValue::UInt32(sys::kEdsEvfOutputDevice_PC),
        )
        .unwrap();
        sdk.download_evf_image(device, image).unwrap();
        let bytes = sdk.stream_bytes(stream).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
