//! Canon EDSDK backend.
//!
//! Wraps the raw `edsdk-sys` calls behind [`CameraSdk`]. Camera references
//! returned by enumeration are retained here until [`CameraSdk::terminate`];
//! [`DeviceHandle`] and [`ObjectRef`] carry the raw pointer values.
#![allow(unsafe_code)]

use super::{
    CameraInfo, CameraSdk, Capacity, DeviceHandle, DirectoryItemInfo, NativeEvent,
    NativeEventSink, ObjectRef, PropertyId, PropertyValue,
};
use crate::error::{check, SdkError, SdkResult};
use edsdk_sys::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::CStr;
use std::os::raw::{c_char, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Raw SDK pointer that may cross threads. The SDK serializes access internally;
/// the engine additionally confines device calls to its dispatch worker.
#[derive(Clone, Copy)]
struct RawRef(EdsBaseRef);

unsafe impl Send for RawRef {}

struct SinkContext {
    sink: Arc<dyn NativeEventSink>,
}

/// [`CameraSdk`] over the linked EDSDK library.
pub struct EdsSdk {
    cameras: Mutex<HashMap<usize, RawRef>>,
    sinks: Mutex<HashMap<usize, Box<SinkContext>>>,
}

impl Default for EdsSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl EdsSdk {
    /// No cameras known until the first enumeration.
    pub fn new() -> Self {
        Self {
            cameras: Mutex::new(HashMap::new()),
            sinks: Mutex::new(HashMap::new()),
        }
    }

    fn camera(&self, device: DeviceHandle, context: &str) -> SdkResult<EdsCameraRef> {
        self.cameras
            .lock()
            .get(&device.0)
            .map(|r| r.0)
            .ok_or_else(|| SdkError::from_status(EDS_ERR_DEVICE_NOT_FOUND, context))
    }
}

fn raw(object: ObjectRef) -> EdsBaseRef {
    object.0 as EdsBaseRef
}

fn cstr_to_string(buf: &[c_char]) -> String {
    if !buf.contains(&0) {
        return String::new();
    }
    // SAFETY: the buffer is NUL-terminated within its bounds (checked above).
    unsafe { CStr::from_ptr(buf.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

impl CameraSdk for EdsSdk {
    fn initialize(&self) -> SdkResult<()> {
        check(unsafe { EdsInitializeSDK() }, "EdsInitializeSDK")
    }

    fn terminate(&self) -> SdkResult<()> {
        self.sinks.lock().clear();
        for (_, camera) in self.cameras.lock().drain() {
            unsafe { EdsRelease(camera.0) };
        }
        check(unsafe { EdsTerminateSDK() }, "EdsTerminateSDK")
    }

    fn enumerate_cameras(&self) -> SdkResult<Vec<CameraInfo>> {
        let mut list: EdsCameraListRef = ptr::null_mut();
        check(unsafe { EdsGetCameraList(&mut list) }, "EdsGetCameraList")?;

        let mut count: EdsUInt32 = 0;
        let result = check(unsafe { EdsGetChildCount(list, &mut count) }, "EdsGetChildCount")
            .and_then(|()| {
                let mut found = Vec::with_capacity(count as usize);
                let mut cameras = self.cameras.lock();
                for index in 0..count as EdsInt32 {
                    let mut camera: EdsCameraRef = ptr::null_mut();
                    check(
                        unsafe { EdsGetChildAtIndex(list, index, &mut camera) },
                        "EdsGetChildAtIndex",
                    )?;
                    let mut info: EdsDeviceInfo = unsafe { std::mem::zeroed() };
                    let status = unsafe { EdsGetDeviceInfo(camera, &mut info) };
                    if let Err(e) = check(status, "EdsGetDeviceInfo") {
                        unsafe { EdsRelease(camera) };
                        return Err(e);
                    }

                    let key = camera as usize;
                    if cameras.contains_key(&key) {
                        // Same camera object, already retained from an earlier enumeration.
                        unsafe { EdsRelease(camera) };
                    } else {
                        cameras.insert(key, RawRef(camera));
                    }
                    found.push(CameraInfo {
                        handle: DeviceHandle(key),
                        description: cstr_to_string(&info.szDeviceDescription),
                        port_name: cstr_to_string(&info.szPortName),
                    });
                }
                Ok(found)
            });

        unsafe { EdsRelease(list) };
        result
    }

    fn open_session(&self, device: DeviceHandle) -> SdkResult<()> {
        let camera = self.camera(device, "EdsOpenSession")?;
        check(unsafe { EdsOpenSession(camera) }, "EdsOpenSession")
    }

    fn close_session(&self, device: DeviceHandle) -> SdkResult<()> {
        let camera = self.camera(device, "EdsCloseSession")?;
        check(unsafe { EdsCloseSession(camera) }, "EdsCloseSession")
    }

    fn send_command(&self, device: DeviceHandle, command: u32, param: i32) -> SdkResult<()> {
        let camera = self.camera(device, "EdsSendCommand")?;
        check(
            unsafe { EdsSendCommand(camera, command, param) },
            "EdsSendCommand",
        )
    }

    fn get_property(
        &self,
        device: DeviceHandle,
        property: PropertyId,
        param: i32,
    ) -> SdkResult<PropertyValue> {
        let camera = self.camera(device, "EdsGetPropertySize")?;
        let mut data_type: EdsDataType = kEdsDataType_Unknown;
        let mut size: EdsUInt32 = 0;
        check(
            unsafe { EdsGetPropertySize(camera, property.0, param, &mut data_type, &mut size) },
            "EdsGetPropertySize",
        )?;

        match data_type {
            kEdsDataType_String => {
                let mut buf = vec![0 as c_char; size.max(1) as usize];
                check(
                    unsafe {
                        EdsGetPropertyData(
                            camera,
                            property.0,
                            param,
                            size,
                            buf.as_mut_ptr() as *mut c_void,
                        )
                    },
                    "EdsGetPropertyData",
                )?;
                if let Some(last) = buf.last_mut() {
                    *last = 0;
                }
                Ok(PropertyValue::String(cstr_to_string(&buf)))
            }
            kEdsDataType_Point => {
                let mut point = EdsPoint::default();
                check(
                    unsafe {
                        EdsGetPropertyData(
                            camera,
                            property.0,
                            param,
                            std::mem::size_of::<EdsPoint>() as EdsUInt32,
                            &mut point as *mut EdsPoint as *mut c_void,
                        )
                    },
                    "EdsGetPropertyData",
                )?;
                Ok(PropertyValue::Point {
                    x: point.x,
                    y: point.y,
                })
            }
            kEdsDataType_Int32 => {
                let mut value: EdsInt32 = 0;
                check(
                    unsafe {
                        EdsGetPropertyData(
                            camera,
                            property.0,
                            param,
                            4,
                            &mut value as *mut EdsInt32 as *mut c_void,
                        )
                    },
                    "EdsGetPropertyData",
                )?;
                Ok(PropertyValue::Int32(value))
            }
            _ if size == 4 => {
                let mut value: EdsUInt32 = 0;
                check(
                    unsafe {
                        EdsGetPropertyData(
                            camera,
                            property.0,
                            param,
                            4,
                            &mut value as *mut EdsUInt32 as *mut c_void,
                        )
                    },
                    "EdsGetPropertyData",
                )?;
                Ok(PropertyValue::UInt32(value))
            }
            other => {
                debug!(property = %property, data_type = other, size, "Unsupported property shape");
                Err(SdkError::from_status(EDS_ERR_NOT_SUPPORTED, "EdsGetPropertyData"))
            }
        }
    }

    fn set_property(
        &self,
        device: DeviceHandle,
        property: PropertyId,
        param: i32,
        value: &PropertyValue,
    ) -> SdkResult<()> {
        let camera = self.camera(device, "EdsSetPropertyData")?;
        let status = match value {
            PropertyValue::UInt32(v) => unsafe {
                EdsSetPropertyData(camera, property.0, param, 4, v as *const u32 as *const c_void)
            },
            PropertyValue::Int32(v) => unsafe {
                EdsSetPropertyData(camera, property.0, param, 4, v as *const i32 as *const c_void)
            },
            PropertyValue::Point { x, y } => {
                let point = EdsPoint { x: *x, y: *y };
                unsafe {
                    EdsSetPropertyData(
                        camera,
                        property.0,
                        param,
                        std::mem::size_of::<EdsPoint>() as EdsUInt32,
                        &point as *const EdsPoint as *const c_void,
                    )
                }
            }
            PropertyValue::String(s) => {
                let mut bytes = s.as_bytes().to_vec();
                bytes.push(0);
                unsafe {
                    EdsSetPropertyData(
                        camera,
                        property.0,
                        param,
                        bytes.len() as EdsUInt32,
                        bytes.as_ptr() as *const c_void,
                    )
                }
            }
        };
        check(status, "EdsSetPropertyData")
    }

    fn get_property_desc(
        &self,
        device: DeviceHandle,
        property: PropertyId,
    ) -> SdkResult<Vec<i32>> {
        let camera = self.camera(device, "EdsGetPropertyDesc")?;
        let mut desc: EdsPropertyDesc = unsafe { std::mem::zeroed() };
        check(
            unsafe { EdsGetPropertyDesc(camera, property.0, &mut desc) },
            "EdsGetPropertyDesc",
        )?;
        let n = (desc.numElements.max(0) as usize).min(desc.propDesc.len());
        Ok(desc.propDesc[..n].to_vec())
    }

    fn set_capacity(&self, device: DeviceHandle, capacity: Capacity) -> SdkResult<()> {
        let camera = self.camera(device, "EdsSetCapacity")?;
        let capacity = EdsCapacity {
            numberOfFreeClusters: capacity.free_clusters,
            bytesPerSector: capacity.bytes_per_sector,
            reset: EdsBool::from(capacity.reset),
        };
        check(unsafe { EdsSetCapacity(camera, capacity) }, "EdsSetCapacity")
    }

    fn directory_item_info(&self, item: ObjectRef) -> SdkResult<DirectoryItemInfo> {
        let mut info: EdsDirectoryItemInfo = unsafe { std::mem::zeroed() };
        check(
            unsafe { EdsGetDirectoryItemInfo(raw(item), &mut info) },
            "EdsGetDirectoryItemInfo",
        )?;
        Ok(DirectoryItemInfo {
            size: info.size,
            is_folder: info.isFolder != 0,
            file_name: cstr_to_string(&info.szFileName),
        })
    }

    fn create_memory_stream(&self, size: u64) -> SdkResult<ObjectRef> {
        let mut stream: EdsStreamRef = ptr::null_mut();
        check(
            unsafe { EdsCreateMemoryStream(size, &mut stream) },
            "EdsCreateMemoryStream",
        )?;
        Ok(ObjectRef(stream as usize))
    }

    fn download(&self, item: ObjectRef, size: u64, stream: ObjectRef) -> SdkResult<()> {
        check(
            unsafe { EdsDownload(raw(item), size, raw(stream)) },
            "EdsDownload",
        )
    }

    fn download_complete(&self, item: ObjectRef) -> SdkResult<()> {
        check(unsafe { EdsDownloadComplete(raw(item)) }, "EdsDownloadComplete")
    }

    fn download_cancel(&self, item: ObjectRef) -> SdkResult<()> {
        check(unsafe { EdsDownloadCancel(raw(item)) }, "EdsDownloadCancel")
    }

    fn stream_bytes(&self, stream: ObjectRef) -> SdkResult<Vec<u8>> {
        let mut data: *mut c_void = ptr::null_mut();
        check(unsafe { EdsGetPointer(raw(stream), &mut data) }, "EdsGetPointer")?;
        let mut length: EdsUInt64 = 0;
        check(unsafe { EdsGetLength(raw(stream), &mut length) }, "EdsGetLength")?;
        if data.is_null() || length == 0 {
            return Ok(Vec::new());
        }
        let length = usize::try_from(length)
            .map_err(|_| SdkError::from_status(EDS_ERR_INVALID_LENGTH, "EdsGetLength"))?;
        // SAFETY: the SDK owns `length` readable bytes at `data` until the stream is released.
        let bytes = unsafe { std::slice::from_raw_parts(data as *const u8, length) };
        Ok(bytes.to_vec())
    }

    fn create_evf_image_ref(&self, stream: ObjectRef) -> SdkResult<ObjectRef> {
        let mut image: EdsEvfImageRef = ptr::null_mut();
        check(
            unsafe { EdsCreateEvfImageRef(raw(stream), &mut image) },
            "EdsCreateEvfImageRef",
        )?;
        Ok(ObjectRef(image as usize))
    }

    fn download_evf_image(&self, device: DeviceHandle, image: ObjectRef) -> SdkResult<()> {
        let camera = self.camera(device, "EdsDownloadEvfImage")?;
        check(
            unsafe { EdsDownloadEvfImage(camera, raw(image)) },
            "EdsDownloadEvfImage",
        )
    }

    fn release(&self, object: ObjectRef) -> SdkResult<()> {
        // EdsRelease returns the remaining reference count, not a status.
        unsafe { EdsRelease(raw(object)) };
        Ok(())
    }

    fn set_event_sink(
        &self,
        device: DeviceHandle,
        sink: Option<Arc<dyn NativeEventSink>>,
    ) -> SdkResult<()> {
        let camera = self.camera(device, "EdsSetObjectEventHandler")?;
        let mut sinks = self.sinks.lock();

        let Some(sink) = sink else {
            unsafe {
                check(
                    EdsSetObjectEventHandler(camera, kEdsObjectEvent_All, None, ptr::null_mut()),
                    "EdsSetObjectEventHandler",
                )?;
                check(
                    EdsSetPropertyEventHandler(
                        camera,
                        kEdsPropertyEvent_All,
                        None,
                        ptr::null_mut(),
                    ),
                    "EdsSetPropertyEventHandler",
                )?;
                check(
                    EdsSetCameraStateEventHandler(
                        camera,
                        kEdsStateEvent_All,
                        None,
                        ptr::null_mut(),
                    ),
                    "EdsSetCameraStateEventHandler",
                )?;
            }
            sinks.remove(&device.0);
            return Ok(());
        };

        let context = Box::new(SinkContext { sink });
        let context_ptr = &*context as *const SinkContext as *mut c_void;
        unsafe {
            check(
                EdsSetObjectEventHandler(
                    camera,
                    kEdsObjectEvent_All,
                    Some(object_event_handler),
                    context_ptr,
                ),
                "EdsSetObjectEventHandler",
            )?;
            check(
                EdsSetPropertyEventHandler(
                    camera,
                    kEdsPropertyEvent_All,
                    Some(property_event_handler),
                    context_ptr,
                ),
                "EdsSetPropertyEventHandler",
            )?;
            check(
                EdsSetCameraStateEventHandler(
                    camera,
                    kEdsStateEvent_All,
                    Some(state_event_handler),
                    context_ptr,
                ),
                "EdsSetCameraStateEventHandler",
            )?;
        }
        // The previous context (if any) stays alive until the handlers pointing at
        // it have been replaced above.
        sinks.insert(device.0, context);
        Ok(())
    }

    fn pump_events(&self) -> SdkResult<()> {
        check(unsafe { EdsGetEvent() }, "EdsGetEvent")
    }
}

fn deliver(context: *mut c_void, event: NativeEvent) {
    if context.is_null() {
        warn!("Dropping SDK event without a context: {:?}", event);
        return;
    }
    // SAFETY: `context` points at a `SinkContext` kept alive in `EdsSdk::sinks`
    // for as long as the handler is registered.
    let context = unsafe { &*(context as *const SinkContext) };
    if catch_unwind(AssertUnwindSafe(|| context.sink.deliver(event))).is_err() {
        error!("Event sink panicked inside an SDK callback");
    }
}

unsafe extern "system" fn object_event_handler(
    event: EdsObjectEvent,
    object: EdsBaseRef,
    context: *mut c_void,
) -> EdsError {
    if object.is_null() {
        return EDS_ERR_OK;
    }
    deliver(
        context,
        NativeEvent::Object {
            event,
            object: ObjectRef(object as usize),
        },
    );
    EDS_ERR_OK
}

unsafe extern "system" fn property_event_handler(
    event: EdsPropertyEvent,
    property: EdsPropertyID,
    param: EdsUInt32,
    context: *mut c_void,
) -> EdsError {
    deliver(
        context,
        NativeEvent::Property {
            event,
            property: PropertyId(property),
            param,
        },
    );
    EDS_ERR_OK
}

unsafe extern "system" fn state_event_handler(
    event: EdsStateEvent,
    param: EdsUInt32,
    context: *mut c_void,
) -> EdsError {
    deliver(context, NativeEvent::State { event, param });
    EDS_ERR_OK
}
