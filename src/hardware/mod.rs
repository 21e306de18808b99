//! Native SDK boundary.
//!
//! [`CameraSdk`] is the one seam between the engine and the vendor library. All
//! methods take `&self` and report raw failures as [`SdkError`]; implementations
//! keep whatever interior state they need. The engine never calls a `CameraSdk`
//! from more than one thread at a time except for event delivery (see
//! [`NativeEventSink`]).
//!
//! - [`mock::MockSdk`]: simulated camera used by tests and the default CLI build.
//! - `edsdk::EdsSdk`: the real library, behind the `edsdk_hardware` feature.

pub mod handle;
pub mod lifetime;
pub mod mock;

#[cfg(feature = "edsdk_hardware")]
pub mod edsdk;

pub use handle::{HandleRegistry, ScopedHandle};
pub use lifetime::{SdkLease, SdkLifetime};

use crate::error::SdkResult;
use edsdk_sys as sys;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Opaque camera identifier returned by enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceHandle(pub usize);

/// Opaque reference-counted SDK object (directory item, stream, EVF image).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(pub usize);

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Vendor property id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(pub u32);

impl PropertyId {
    /// Camera model name
    pub const PRODUCT_NAME: Self = Self(sys::kEdsPropID_ProductName);
    /// Battery level, percent
    pub const BATTERY_LEVEL: Self = Self(sys::kEdsPropID_BatteryLevel);
    /// Where captures are stored (card, host or both)
    pub const SAVE_TO: Self = Self(sys::kEdsPropID_SaveTo);
    /// Image size and compression
    pub const IMAGE_QUALITY: Self = Self(sys::kEdsPropID_ImageQuality);
    /// Shooting mode as shown on the dial
    pub const AE_MODE: Self = Self(sys::kEdsPropID_AEMode);
    /// Shooting mode selected by the host
    pub const AE_MODE_SELECT: Self = Self(sys::kEdsPropID_AEModeSelect);
    /// ISO code
    pub const ISO_SPEED: Self = Self(sys::kEdsPropID_ISOSpeed);
    /// Metering mode code
    pub const METERING_MODE: Self = Self(sys::kEdsPropID_MeteringMode);
    /// Aperture code
    pub const AV: Self = Self(sys::kEdsPropID_Av);
    /// Shutter speed code
    pub const TV: Self = Self(sys::kEdsPropID_Tv);
    /// Exposure compensation code
    pub const EXPOSURE_COMPENSATION: Self = Self(sys::kEdsPropID_ExposureCompensation);
    /// Remaining shots on the card
    pub const AVAILABLE_SHOTS: Self = Self(sys::kEdsPropID_AvailableShots);
    /// Live-view output (camera, host)
    pub const EVF_OUTPUT_DEVICE: Self = Self(sys::kEdsPropID_Evf_OutputDevice);
    /// Live view enabled
    pub const EVF_MODE: Self = Self(sys::kEdsPropID_Evf_Mode);
    /// Depth-of-field preview
    pub const EVF_DEPTH_OF_FIELD_PREVIEW: Self = Self(sys::kEdsPropID_Evf_DepthOfFieldPreview);
    /// Live-view zoom ratio
    pub const EVF_ZOOM: Self = Self(sys::kEdsPropID_Evf_Zoom);
    /// Top-left corner of the zoomed region
    pub const EVF_ZOOM_POSITION: Self = Self(sys::kEdsPropID_Evf_ZoomPosition);
    /// Live-view AF mode
    pub const EVF_AF_MODE: Self = Self(sys::kEdsPropID_Evf_AFMode);
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Property payload in one of the shapes the engine reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// `kEdsDataType_UInt32`, also used for most enumerated codes.
    UInt32(u32),
    /// `kEdsDataType_Int32`
    Int32(i32),
    /// `kEdsDataType_String`
    String(String),
    /// `kEdsDataType_Point`, e.g. the EVF zoom position.
    Point {
        /// Horizontal coordinate
        x: i32,
        /// Vertical coordinate
        y: i32,
    },
}

impl PropertyValue {
    /// Numeric view, for the many properties that are enumerated codes.
    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            PropertyValue::UInt32(v) => Some(v),
            PropertyValue::Int32(v) => u32::try_from(v).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::UInt32(v) => write!(f, "{v} (0x{v:X})"),
            PropertyValue::Int32(v) => write!(f, "{v}"),
            PropertyValue::String(s) => f.write_str(s),
            PropertyValue::Point { x, y } => write!(f, "({x}, {y})"),
        }
    }
}

/// Host storage capacity reported to the camera before transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    /// Free clusters advertised to the camera
    pub free_clusters: i32,
    /// Cluster size in bytes
    pub bytes_per_sector: i32,
    /// Reset the camera's capacity bookkeeping
    pub reset: bool,
}

impl Default for Capacity {
    fn default() -> Self {
        Self {
            free_clusters: 0x7FFF_FFFF,
            bytes_per_sector: 0x1000,
            reset: true,
        }
    }
}

/// One enumerated camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraInfo {
    /// Handle to pass to `connect`
    pub handle: DeviceHandle,
    /// Model name as reported by the device
    pub description: String,
    /// Transport port, e.g. a USB path
    pub port_name: String,
}

/// Metadata of a file on the camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryItemInfo {
    /// File size in bytes
    pub size: u64,
    /// Whether the item is a folder
    pub is_folder: bool,
    /// File name on the card
    pub file_name: String,
}

/// Raw notification as delivered by the SDK callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeEvent {
    /// Property changed or its allowed values changed.
    Property {
        /// `kEdsPropertyEvent_*` id
        event: u32,
        /// Affected property
        property: PropertyId,
        /// Property parameter
        param: u32,
    },
    /// The receiver owns `object` and must release it.
    Object {
        /// `kEdsObjectEvent_*` id
        event: u32,
        /// Object the event refers to
        object: ObjectRef,
    },
    /// Camera state change, e.g. shutdown.
    State {
        /// `kEdsStateEvent_*` id
        event: u32,
        /// Event-specific parameter
        param: u32,
    },
}

/// Receiver for native callbacks.
///
/// `deliver` runs on whatever thread the SDK invokes its handlers from and must
/// finish before the SDK continues.
pub trait NativeEventSink: Send + Sync {
    /// Handle one callback.
    fn deliver(&self, event: NativeEvent);
}

/// Camera SDK trait
pub trait CameraSdk: Send + Sync {
    /// Initialize SDK
    fn initialize(&self) -> SdkResult<()>;

    /// Terminate SDK
    fn terminate(&self) -> SdkResult<()>;

    /// List connected cameras
    fn enumerate_cameras(&self) -> SdkResult<Vec<CameraInfo>>;

    /// Open a session with `device`
    fn open_session(&self, device: DeviceHandle) -> SdkResult<()>;

    /// Close a session with `device`
    fn close_session(&self, device: DeviceHandle) -> SdkResult<()>;

    /// `EdsSendCommand` with a command id and its parameter
    fn send_command(&self, device: DeviceHandle, command: u32, param: i32) -> SdkResult<()>;

    /// Read a property value
    fn get_property(
        &self,
        device: DeviceHandle,
        property: PropertyId,
        param: i32,
    ) -> SdkResult<PropertyValue>;

    /// Write a property value
    fn set_property(
        &self,
        device: DeviceHandle,
        property: PropertyId,
        param: i32,
        value: &PropertyValue,
    ) -> SdkResult<()>;

    /// Values the camera currently accepts for a property
    fn get_property_desc(&self, device: DeviceHandle, property: PropertyId)
        -> SdkResult<Vec<i32>>;

    /// Advertise host storage before save-to-host transfers
    fn set_capacity(&self, device: DeviceHandle, capacity: Capacity) -> SdkResult<()>;

    /// Metadata of a directory item
    fn directory_item_info(&self, item: ObjectRef) -> SdkResult<DirectoryItemInfo>;

    /// Acquire a memory stream; `size` 0 lets the SDK grow it.
    fn create_memory_stream(&self, size: u64) -> SdkResult<ObjectRef>;

    /// Copy `size` bytes of `item` into `stream`.
    fn download(&self, item: ObjectRef, size: u64, stream: ObjectRef) -> SdkResult<()>;

    /// Tell the camera a transfer finished.
    fn download_complete(&self, item: ObjectRef) -> SdkResult<()>;

    /// Tell the camera a transfer was abandoned.
    fn download_cancel(&self, item: ObjectRef) -> SdkResult<()>;

    /// Copy the contents of a memory stream out of SDK memory.
    fn stream_bytes(&self, stream: ObjectRef) -> SdkResult<Vec<u8>>;

    /// Acquire an EVF image reference bound to `stream`.
    fn create_evf_image_ref(&self, stream: ObjectRef) -> SdkResult<ObjectRef>;

    /// Fill `image` with the current live-view frame.
    fn download_evf_image(&self, device: DeviceHandle, image: ObjectRef) -> SdkResult<()>;

    /// Drop one reference to an SDK object.
    fn release(&self, object: ObjectRef) -> SdkResult<()>;

    /// Route all property, object and state callbacks for `device` to `sink`.
    /// `None` unregisters.
    fn set_event_sink(
        &self,
        device: DeviceHandle,
        sink: Option<Arc<dyn NativeEventSink>>,
    ) -> SdkResult<()>;

    /// Service pending callbacks on the calling thread (`EdsGetEvent`).
    fn pump_events(&self) -> SdkResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_serialize<T: Serialize>() {}

    #[test]
    fn test_camera_listing_is_serializable() {
        assert_serialize::<DeviceHandle>();
        assert_serialize::<CameraInfo>();
        assert_serialize::<Vec<CameraInfo>>();
    }

    #[test]
    fn test_property_value_views() {
        assert_eq!(PropertyValue::UInt32(0x48).as_u32(), Some(0x48));
        assert_eq!(PropertyValue::Int32(-1).as_u32(), None);
        assert_eq!(PropertyValue::String("EOS".into()).as_u32(), None);
        assert_eq!(PropertyValue::UInt32(0x48).to_string(), "72 (0x48)");
        assert_eq!(PropertyId::ISO_SPEED.to_string(), "0x0402");
    }
}
