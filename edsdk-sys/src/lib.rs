//! Raw declarations for the Canon EDSDK.
//!
//! The numeric constants below mirror the vendor headers (`EDSDKErrors.h`,
//! `EDSDKTypes.h`) and are always compiled. The `extern` function block is only
//! compiled with the `edsdk` feature, which also makes the build script emit the
//! link directives for the installed SDK.
#![allow(non_camel_case_types, non_snake_case, non_upper_case_globals)]
#![allow(missing_docs)]

use std::os::raw::{c_char, c_void};

pub type EdsError = u32;
pub type EdsUInt32 = u32;
pub type EdsInt32 = i32;
pub type EdsUInt64 = u64;
pub type EdsBool = i32;
pub type EdsPropertyID = u32;
pub type EdsCameraCommand = u32;
pub type EdsObjectEvent = u32;
pub type EdsPropertyEvent = u32;
pub type EdsStateEvent = u32;
pub type EdsDataType = u32;

pub type EdsBaseRef = *mut c_void;
pub type EdsCameraListRef = EdsBaseRef;
pub type EdsCameraRef = EdsBaseRef;
pub type EdsDirectoryItemRef = EdsBaseRef;
pub type EdsStreamRef = EdsBaseRef;
pub type EdsEvfImageRef = EdsBaseRef;

pub const EDS_MAX_NAME: usize = 256;

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

pub const EDS_ERRORID_MASK: EdsError = 0x0000_FFFF;

pub const EDS_ERR_OK: EdsError = 0x0000_0000;

// Miscellaneous errors
pub const EDS_ERR_UNIMPLEMENTED: EdsError = 0x0000_0001;
pub const EDS_ERR_INTERNAL_ERROR: EdsError = 0x0000_0002;
pub const EDS_ERR_MEM_ALLOC_FAILED: EdsError = 0x0000_0003;
pub const EDS_ERR_MEM_FREE_FAILED: EdsError = 0x0000_0004;
pub const EDS_ERR_OPERATION_CANCELLED: EdsError = 0x0000_0005;
pub const EDS_ERR_INCOMPATIBLE_VERSION: EdsError = 0x0000_0006;
pub const EDS_ERR_NOT_SUPPORTED: EdsError = 0x0000_0007;
pub const EDS_ERR_UNEXPECTED_EXCEPTION: EdsError = 0x0000_0008;
pub const EDS_ERR_PROTECTION_VIOLATION: EdsError = 0x0000_0009;
pub const EDS_ERR_MISSING_SUBCOMPONENT: EdsError = 0x0000_000A;
pub const EDS_ERR_SELECTION_UNAVAILABLE: EdsError = 0x0000_000B;

// File errors
pub const EDS_ERR_FILE_IO_ERROR: EdsError = 0x0000_0020;
pub const EDS_ERR_FILE_TOO_MANY_OPEN: EdsError = 0x0000_0021;
pub const EDS_ERR_FILE_NOT_FOUND: EdsError = 0x0000_0022;
pub const EDS_ERR_FILE_OPEN_ERROR: EdsError = 0x0000_0023;
pub const EDS_ERR_FILE_CLOSE_ERROR: EdsError = 0x0000_0024;
pub const EDS_ERR_FILE_SEEK_ERROR: EdsError = 0x0000_0025;
pub const EDS_ERR_FILE_TELL_ERROR: EdsError = 0x0000_0026;
pub const EDS_ERR_FILE_READ_ERROR: EdsError = 0x0000_0027;
pub const EDS_ERR_FILE_WRITE_ERROR: EdsError = 0x0000_0028;
pub const EDS_ERR_FILE_PERMISSION_ERROR: EdsError = 0x0000_0029;
pub const EDS_ERR_FILE_DISK_FULL_ERROR: EdsError = 0x0000_002A;
pub const EDS_ERR_FILE_ALREADY_EXISTS: EdsError = 0x0000_002B;
pub const EDS_ERR_FILE_FORMAT_UNRECOGNIZED: EdsError = 0x0000_002C;
pub const EDS_ERR_FILE_DATA_CORRUPT: EdsError = 0x0000_002D;
pub const EDS_ERR_FILE_NAMING_NA: EdsError = 0x0000_002E;

// Directory errors
pub const EDS_ERR_DIR_NOT_FOUND: EdsError = 0x0000_0040;
pub const EDS_ERR_DIR_IO_ERROR: EdsError = 0x0000_0041;
pub const EDS_ERR_DIR_ENTRY_NOT_FOUND: EdsError = 0x0000_0042;
pub const EDS_ERR_DIR_ENTRY_EXISTS: EdsError = 0x0000_0043;
pub const EDS_ERR_DIR_NOT_EMPTY: EdsError = 0x0000_0044;

// Property errors
pub const EDS_ERR_PROPERTIES_UNAVAILABLE: EdsError = 0x0000_0050;
pub const EDS_ERR_PROPERTIES_MISMATCH: EdsError = 0x0000_0051;
pub const EDS_ERR_PROPERTIES_NOT_LOADED: EdsError = 0x0000_0053;

// Function parameter errors
pub const EDS_ERR_INVALID_PARAMETER: EdsError = 0x0000_0060;
pub const EDS_ERR_INVALID_HANDLE: EdsError = 0x0000_0061;
pub const EDS_ERR_INVALID_POINTER: EdsError = 0x0000_0062;
pub const EDS_ERR_INVALID_INDEX: EdsError = 0x0000_0063;
pub const EDS_ERR_INVALID_LENGTH: EdsError = 0x0000_0064;
pub const EDS_ERR_INVALID_FN_POINTER: EdsError = 0x0000_0065;
pub const EDS_ERR_INVALID_SORT_FN: EdsError = 0x0000_0066;

// Device errors
pub const EDS_ERR_DEVICE_NOT_FOUND: EdsError = 0x0000_0080;
pub const EDS_ERR_DEVICE_BUSY: EdsError = 0x0000_0081;
pub const EDS_ERR_DEVICE_INVALID: EdsError = 0x0000_0082;
pub const EDS_ERR_DEVICE_EMERGENCY: EdsError = 0x0000_0083;
pub const EDS_ERR_DEVICE_MEMORY_FULL: EdsError = 0x0000_0084;
pub const EDS_ERR_DEVICE_INTERNAL_ERROR: EdsError = 0x0000_0085;
pub const EDS_ERR_DEVICE_INVALID_PARAMETER: EdsError = 0x0000_0086;
pub const EDS_ERR_DEVICE_NO_DISK: EdsError = 0x0000_0087;
pub const EDS_ERR_DEVICE_DISK_ERROR: EdsError = 0x0000_0088;
pub const EDS_ERR_DEVICE_CF_GATE_CHANGED: EdsError = 0x0000_0089;
pub const EDS_ERR_DEVICE_DIAL_CHANGED: EdsError = 0x0000_008A;
pub const EDS_ERR_DEVICE_NOT_INSTALLED: EdsError = 0x0000_008B;
pub const EDS_ERR_DEVICE_STAY_AWAKE: EdsError = 0x0000_008C;
pub const EDS_ERR_DEVICE_NOT_RELEASED: EdsError = 0x0000_008D;

// Stream errors
pub const EDS_ERR_STREAM_IO_ERROR: EdsError = 0x0000_00A0;
pub const EDS_ERR_STREAM_NOT_OPEN: EdsError = 0x0000_00A1;
pub const EDS_ERR_STREAM_ALREADY_OPEN: EdsError = 0x0000_00A2;
pub const EDS_ERR_STREAM_OPEN_ERROR: EdsError = 0x0000_00A3;
pub const EDS_ERR_STREAM_CLOSE_ERROR: EdsError = 0x0000_00A4;
pub const EDS_ERR_STREAM_SEEK_ERROR: EdsError = 0x0000_00A5;
pub const EDS_ERR_STREAM_TELL_ERROR: EdsError = 0x0000_00A6;
pub const EDS_ERR_STREAM_READ_ERROR: EdsError = 0x0000_00A7;
pub const EDS_ERR_STREAM_WRITE_ERROR: EdsError = 0x0000_00A8;
pub const EDS_ERR_STREAM_PERMISSION_ERROR: EdsError = 0x0000_00A9;
pub const EDS_ERR_STREAM_COULDNT_BEGIN_THREAD: EdsError = 0x0000_00AA;
pub const EDS_ERR_STREAM_BAD_OPTIONS: EdsError = 0x0000_00AB;
pub const EDS_ERR_STREAM_END_OF_STREAM: EdsError = 0x0000_00AC;

// Communications errors
pub const EDS_ERR_COMM_PORT_IS_IN_USE: EdsError = 0x0000_00C0;
pub const EDS_ERR_COMM_DISCONNECTED: EdsError = 0x0000_00C1;
pub const EDS_ERR_COMM_DEVICE_INCOMPATIBLE: EdsError = 0x0000_00C2;
pub const EDS_ERR_COMM_BUFFER_FULL: EdsError = 0x0000_00C3;
pub const EDS_ERR_COMM_USB_BUS_ERR: EdsError = 0x0000_00C4;

// Lock/Unlock
pub const EDS_ERR_USB_DEVICE_LOCK_ERROR: EdsError = 0x0000_00D0;
pub const EDS_ERR_USB_DEVICE_UNLOCK_ERROR: EdsError = 0x0000_00D1;

// STI/WIA
pub const EDS_ERR_STI_UNKNOWN_ERROR: EdsError = 0x0000_00E0;
pub const EDS_ERR_STI_INTERNAL_ERROR: EdsError = 0x0000_00E1;
pub const EDS_ERR_STI_DEVICE_CREATE_ERROR: EdsError = 0x0000_00E2;
pub const EDS_ERR_STI_DEVICE_RELEASE_ERROR: EdsError = 0x0000_00E3;
pub const EDS_ERR_DEVICE_NOT_LAUNCHED: EdsError = 0x0000_00E4;

// Other general errors
pub const EDS_ERR_ENUM_NA: EdsError = 0x0000_00F0;
pub const EDS_ERR_INVALID_FN_CALL: EdsError = 0x0000_00F1;
pub const EDS_ERR_HANDLE_NOT_FOUND: EdsError = 0x0000_00F2;
pub const EDS_ERR_INVALID_ID: EdsError = 0x0000_00F3;
pub const EDS_ERR_WAIT_TIMEOUT_ERROR: EdsError = 0x0000_00F4;

// PTP
pub const EDS_ERR_SESSION_NOT_OPEN: EdsError = 0x0000_2003;
pub const EDS_ERR_INVALID_TRANSACTIONID: EdsError = 0x0000_2004;
pub const EDS_ERR_INCOMPLETE_TRANSFER: EdsError = 0x0000_2007;
pub const EDS_ERR_INVALID_STRAGEID: EdsError = 0x0000_2008;
pub const EDS_ERR_DEVICEPROP_NOT_SUPPORTED: EdsError = 0x0000_200A;
pub const EDS_ERR_INVALID_OBJECTFORMATCODE: EdsError = 0x0000_200B;
pub const EDS_ERR_SELF_TEST_FAILED: EdsError = 0x0000_2011;
pub const EDS_ERR_PARTIAL_DELETION: EdsError = 0x0000_2012;
pub const EDS_ERR_SPECIFICATION_BY_FORMAT_UNSUPPORTED: EdsError = 0x0000_2014;
pub const EDS_ERR_NO_VALID_OBJECTINFO: EdsError = 0x0000_2015;
pub const EDS_ERR_INVALID_CODE_FORMAT: EdsError = 0x0000_2016;
pub const EDS_ERR_UNKNOWN_VENDOR_CODE: EdsError = 0x0000_2017;
pub const EDS_ERR_CAPTURE_ALREADY_TERMINATED: EdsError = 0x0000_2018;
pub const EDS_ERR_PTP_DEVICE_BUSY: EdsError = 0x0000_2019;
pub const EDS_ERR_INVALID_PARENTOBJECT: EdsError = 0x0000_201A;
pub const EDS_ERR_INVALID_DEVICEPROP_FORMAT: EdsError = 0x0000_201B;
pub const EDS_ERR_INVALID_DEVICEPROP_VALUE: EdsError = 0x0000_201C;
pub const EDS_ERR_SESSION_ALREADY_OPEN: EdsError = 0x0000_201E;
pub const EDS_ERR_TRANSACTION_CANCELLED: EdsError = 0x0000_201F;
pub const EDS_ERR_SPECIFICATION_OF_DESTINATION_UNSUPPORTED: EdsError = 0x0000_2020;
pub const EDS_ERR_NOT_CAMERA_SUPPORT_SDK_VERSION: EdsError = 0x0000_2021;

// PTP vendor
pub const EDS_ERR_UNKNOWN_COMMAND: EdsError = 0x0000_A001;
pub const EDS_ERR_OPERATION_REFUSED: EdsError = 0x0000_A005;
pub const EDS_ERR_LENS_COVER_CLOSE: EdsError = 0x0000_A006;
pub const EDS_ERR_LOW_BATTERY: EdsError = 0x0000_A101;
pub const EDS_ERR_OBJECT_NOTREADY: EdsError = 0x0000_A102;
pub const EDS_ERR_CANNOT_MAKE_OBJECT: EdsError = 0x0000_A104;
pub const EDS_ERR_MEMORYSTATUS_NOTREADY: EdsError = 0x0000_A106;

// Take picture errors
pub const EDS_ERR_TAKE_PICTURE_AF_NG: EdsError = 0x0000_8D01;
pub const EDS_ERR_TAKE_PICTURE_RESERVED: EdsError = 0x0000_8D02;
pub const EDS_ERR_TAKE_PICTURE_MIRROR_UP_NG: EdsError = 0x0000_8D03;
pub const EDS_ERR_TAKE_PICTURE_SENSOR_CLEANING_NG: EdsError = 0x0000_8D04;
pub const EDS_ERR_TAKE_PICTURE_SILENCE_NG: EdsError = 0x0000_8D05;
pub const EDS_ERR_TAKE_PICTURE_NO_CARD_NG: EdsError = 0x0000_8D06;
pub const EDS_ERR_TAKE_PICTURE_CARD_NG: EdsError = 0x0000_8D07;
pub const EDS_ERR_TAKE_PICTURE_CARD_PROTECT_NG: EdsError = 0x0000_8D08;

pub const EDS_ERR_LAST_GENERIC_ERROR_PLUS_ONE: EdsError = 0x0000_00F5;

// ---------------------------------------------------------------------------
// Property ids
// ---------------------------------------------------------------------------

pub const kEdsPropID_Unknown: EdsPropertyID = 0x0000_FFFF;
pub const kEdsPropID_ProductName: EdsPropertyID = 0x0000_0002;
pub const kEdsPropID_BodyIDEx: EdsPropertyID = 0x0000_0015;
pub const kEdsPropID_OwnerName: EdsPropertyID = 0x0000_0004;
pub const kEdsPropID_MakerName: EdsPropertyID = 0x0000_0005;
pub const kEdsPropID_DateTime: EdsPropertyID = 0x0000_0006;
pub const kEdsPropID_FirmwareVersion: EdsPropertyID = 0x0000_0007;
pub const kEdsPropID_BatteryLevel: EdsPropertyID = 0x0000_0008;
pub const kEdsPropID_SaveTo: EdsPropertyID = 0x0000_000B;
pub const kEdsPropID_CurrentStorage: EdsPropertyID = 0x0000_000C;
pub const kEdsPropID_CurrentFolder: EdsPropertyID = 0x0000_000D;
pub const kEdsPropID_BatteryQuality: EdsPropertyID = 0x0000_0010;

pub const kEdsPropID_ImageQuality: EdsPropertyID = 0x0000_0100;
pub const kEdsPropID_Orientation: EdsPropertyID = 0x0000_0102;
pub const kEdsPropID_WhiteBalance: EdsPropertyID = 0x0000_0106;
pub const kEdsPropID_ColorTemperature: EdsPropertyID = 0x0000_0107;
pub const kEdsPropID_PictureStyle: EdsPropertyID = 0x0000_0114;

pub const kEdsPropID_AEMode: EdsPropertyID = 0x0000_0400;
pub const kEdsPropID_DriveMode: EdsPropertyID = 0x0000_0401;
pub const kEdsPropID_ISOSpeed: EdsPropertyID = 0x0000_0402;
pub const kEdsPropID_MeteringMode: EdsPropertyID = 0x0000_0403;
pub const kEdsPropID_AFMode: EdsPropertyID = 0x0000_0404;
pub const kEdsPropID_Av: EdsPropertyID = 0x0000_0405;
pub const kEdsPropID_Tv: EdsPropertyID = 0x0000_0406;
pub const kEdsPropID_ExposureCompensation: EdsPropertyID = 0x0000_0407;
pub const kEdsPropID_FocalLength: EdsPropertyID = 0x0000_0409;
pub const kEdsPropID_AvailableShots: EdsPropertyID = 0x0000_040A;
pub const kEdsPropID_Bracket: EdsPropertyID = 0x0000_040B;
pub const kEdsPropID_LensName: EdsPropertyID = 0x0000_040D;
pub const kEdsPropID_LensStatus: EdsPropertyID = 0x0000_0416;
pub const kEdsPropID_AEModeSelect: EdsPropertyID = 0x0000_0436;

pub const kEdsPropID_Evf_OutputDevice: EdsPropertyID = 0x0000_0500;
pub const kEdsPropID_Evf_Mode: EdsPropertyID = 0x0000_0501;
pub const kEdsPropID_Evf_WhiteBalance: EdsPropertyID = 0x0000_0502;
pub const kEdsPropID_Evf_ColorTemperature: EdsPropertyID = 0x0000_0503;
pub const kEdsPropID_Evf_DepthOfFieldPreview: EdsPropertyID = 0x0000_0504;
pub const kEdsPropID_Evf_Zoom: EdsPropertyID = 0x0000_0507;
pub const kEdsPropID_Evf_ZoomPosition: EdsPropertyID = 0x0000_0508;
pub const kEdsPropID_Evf_ImagePosition: EdsPropertyID = 0x0000_050B;
pub const kEdsPropID_Evf_AFMode: EdsPropertyID = 0x0000_050E;

// ---------------------------------------------------------------------------
// Camera commands
// ---------------------------------------------------------------------------

pub const kEdsCameraCommand_TakePicture: EdsCameraCommand = 0x0000_0000;
pub const kEdsCameraCommand_ExtendShutDownTimer: EdsCameraCommand = 0x0000_0001;
pub const kEdsCameraCommand_BulbStart: EdsCameraCommand = 0x0000_0002;
pub const kEdsCameraCommand_BulbEnd: EdsCameraCommand = 0x0000_0003;
pub const kEdsCameraCommand_PressShutterButton: EdsCameraCommand = 0x0000_0004;
pub const kEdsCameraCommand_DoEvfAf: EdsCameraCommand = 0x0000_0102;
pub const kEdsCameraCommand_DriveLensEvf: EdsCameraCommand = 0x0000_0103;
pub const kEdsCameraCommand_DoClickWBEvf: EdsCameraCommand = 0x0000_0104;

pub const kEdsCameraCommand_ShutterButton_OFF: EdsInt32 = 0x0000_0000;
pub const kEdsCameraCommand_ShutterButton_Halfway: EdsInt32 = 0x0000_0001;
pub const kEdsCameraCommand_ShutterButton_Completely: EdsInt32 = 0x0000_0003;
pub const kEdsCameraCommand_ShutterButton_Halfway_NonAF: EdsInt32 = 0x0001_0001;
pub const kEdsCameraCommand_ShutterButton_Completely_NonAF: EdsInt32 = 0x0001_0003;

pub const kEdsCameraCommand_EvfAf_OFF: EdsInt32 = 0;
pub const kEdsCameraCommand_EvfAf_ON: EdsInt32 = 1;

pub const kEdsEvfDriveLens_Near1: EdsInt32 = 0x0000_0001;
pub const kEdsEvfDriveLens_Near2: EdsInt32 = 0x0000_0002;
pub const kEdsEvfDriveLens_Near3: EdsInt32 = 0x0000_0003;
pub const kEdsEvfDriveLens_Far1: EdsInt32 = 0x0000_8001;
pub const kEdsEvfDriveLens_Far2: EdsInt32 = 0x0000_8002;
pub const kEdsEvfDriveLens_Far3: EdsInt32 = 0x0000_8003;

pub const kEdsEvfOutputDevice_TFT: EdsUInt32 = 1;
pub const kEdsEvfOutputDevice_PC: EdsUInt32 = 2;

pub const kEdsEvfZoom_Fit: EdsUInt32 = 1;
pub const kEdsEvfZoom_x5: EdsUInt32 = 5;
pub const kEdsEvfZoom_x10: EdsUInt32 = 10;

pub const kEdsSaveTo_Camera: EdsUInt32 = 1;
pub const kEdsSaveTo_Host: EdsUInt32 = 2;
pub const kEdsSaveTo_Both: EdsUInt32 = 3;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

pub const kEdsPropertyEvent_All: EdsPropertyEvent = 0x0000_0100;
pub const kEdsPropertyEvent_PropertyChanged: EdsPropertyEvent = 0x0000_0101;
pub const kEdsPropertyEvent_PropertyDescChanged: EdsPropertyEvent = 0x0000_0102;

pub const kEdsObjectEvent_All: EdsObjectEvent = 0x0000_0200;
pub const kEdsObjectEvent_VolumeInfoChanged: EdsObjectEvent = 0x0000_0201;
pub const kEdsObjectEvent_VolumeUpdateItems: EdsObjectEvent = 0x0000_0202;
pub const kEdsObjectEvent_FolderUpdateItems: EdsObjectEvent = 0x0000_0203;
pub const kEdsObjectEvent_DirItemCreated: EdsObjectEvent = 0x0000_0204;
pub const kEdsObjectEvent_DirItemRemoved: EdsObjectEvent = 0x0000_0205;
pub const kEdsObjectEvent_DirItemInfoChanged: EdsObjectEvent = 0x0000_0206;
pub const kEdsObjectEvent_DirItemContentChanged: EdsObjectEvent = 0x0000_0207;
pub const kEdsObjectEvent_DirItemRequestTransfer: EdsObjectEvent = 0x0000_0208;
pub const kEdsObjectEvent_DirItemRequestTransferDT: EdsObjectEvent = 0x0000_0209;
pub const kEdsObjectEvent_DirItemCancelTransferDT: EdsObjectEvent = 0x0000_020A;
pub const kEdsObjectEvent_VolumeAdded: EdsObjectEvent = 0x0000_020C;
pub const kEdsObjectEvent_VolumeRemoved: EdsObjectEvent = 0x0000_020D;

pub const kEdsStateEvent_All: EdsStateEvent = 0x0000_0300;
pub const kEdsStateEvent_Shutdown: EdsStateEvent = 0x0000_0301;
pub const kEdsStateEvent_JobStatusChanged: EdsStateEvent = 0x0000_0302;
pub const kEdsStateEvent_WillSoonShutDown: EdsStateEvent = 0x0000_0303;
pub const kEdsStateEvent_ShutDownTimerUpdate: EdsStateEvent = 0x0000_0304;
pub const kEdsStateEvent_CaptureError: EdsStateEvent = 0x0000_0305;
pub const kEdsStateEvent_InternalError: EdsStateEvent = 0x0000_0306;
pub const kEdsStateEvent_AfResult: EdsStateEvent = 0x0000_0309;
pub const kEdsStateEvent_BulbExposureTime: EdsStateEvent = 0x0000_0310;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

pub const kEdsDataType_Unknown: EdsDataType = 0;
pub const kEdsDataType_Bool: EdsDataType = 1;
pub const kEdsDataType_String: EdsDataType = 2;
pub const kEdsDataType_Int32: EdsDataType = 8;
pub const kEdsDataType_UInt32: EdsDataType = 9;
pub const kEdsDataType_Point: EdsDataType = 21;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct EdsPoint {
    pub x: EdsInt32,
    pub y: EdsInt32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EdsCapacity {
    pub numberOfFreeClusters: EdsInt32,
    pub bytesPerSector: EdsInt32,
    pub reset: EdsBool,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EdsDeviceInfo {
    pub szPortName: [c_char; EDS_MAX_NAME],
    pub szDeviceDescription: [c_char; EDS_MAX_NAME],
    pub deviceSubType: EdsUInt32,
    pub reserved: EdsUInt32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EdsDirectoryItemInfo {
    pub size: EdsUInt64,
    pub isFolder: EdsBool,
    pub groupID: EdsUInt32,
    pub option: EdsUInt32,
    pub szFileName: [c_char; EDS_MAX_NAME],
    pub format: EdsUInt32,
    pub dateTime: EdsUInt32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EdsPropertyDesc {
    pub form: EdsInt32,
    pub access: EdsInt32,
    pub numElements: EdsInt32,
    pub propDesc: [EdsInt32; 128],
}

pub type EdsObjectEventHandler =
    unsafe extern "system" fn(EdsObjectEvent, EdsBaseRef, *mut c_void) -> EdsError;
pub type EdsPropertyEventHandler = unsafe extern "system" fn(
    EdsPropertyEvent,
    EdsPropertyID,
    EdsUInt32,
    *mut c_void,
) -> EdsError;
pub type EdsStateEventHandler =
    unsafe extern "system" fn(EdsStateEvent, EdsUInt32, *mut c_void) -> EdsError;

#[cfg(feature = "edsdk")]
#[allow(unsafe_code)]
extern "system" {
    pub fn EdsInitializeSDK() -> EdsError;
    pub fn EdsTerminateSDK() -> EdsError;

    pub fn EdsRetain(inRef: EdsBaseRef) -> EdsUInt32;
    pub fn EdsRelease(inRef: EdsBaseRef) -> EdsUInt32;

    pub fn EdsGetChildCount(inRef: EdsBaseRef, outCount: *mut EdsUInt32) -> EdsError;
    pub fn EdsGetChildAtIndex(
        inRef: EdsBaseRef,
        inIndex: EdsInt32,
        outRef: *mut EdsBaseRef,
    ) -> EdsError;

    pub fn EdsGetPropertySize(
        inRef: EdsBaseRef,
        inPropertyID: EdsPropertyID,
        inParam: EdsInt32,
        outDataType: *mut EdsDataType,
        outSize: *mut EdsUInt32,
    ) -> EdsError;
    pub fn EdsGetPropertyData(
        inRef: EdsBaseRef,
        inPropertyID: EdsPropertyID,
        inParam: EdsInt32,
        inPropertySize: EdsUInt32,
        outPropertyData: *mut c_void,
    ) -> EdsError;
    pub fn EdsSetPropertyData(
        inRef: EdsBaseRef,
        inPropertyID: EdsPropertyID,
        inParam: EdsInt32,
        inPropertySize: EdsUInt32,
        inPropertyData: *const c_void,
    ) -> EdsError;
    pub fn EdsGetPropertyDesc(
        inRef: EdsBaseRef,
        inPropertyID: EdsPropertyID,
        outPropertyDesc: *mut EdsPropertyDesc,
    ) -> EdsError;

    pub fn EdsGetCameraList(outCameraListRef: *mut EdsCameraListRef) -> EdsError;
    pub fn EdsGetDeviceInfo(inCameraRef: EdsCameraRef, outDeviceInfo: *mut EdsDeviceInfo)
        -> EdsError;
    pub fn EdsOpenSession(inCameraRef: EdsCameraRef) -> EdsError;
    pub fn EdsCloseSession(inCameraRef: EdsCameraRef) -> EdsError;
    pub fn EdsSendCommand(
        inCameraRef: EdsCameraRef,
        inCommand: EdsCameraCommand,
        inParam: EdsInt32,
    ) -> EdsError;
    pub fn EdsSetCapacity(inCameraRef: EdsCameraRef, inCapacity: EdsCapacity) -> EdsError;

    pub fn EdsGetDirectoryItemInfo(
        inDirItemRef: EdsDirectoryItemRef,
        outDirItemInfo: *mut EdsDirectoryItemInfo,
    ) -> EdsError;
    pub fn EdsDownload(
        inDirItemRef: EdsDirectoryItemRef,
        inReadSize: EdsUInt64,
        outStream: EdsStreamRef,
    ) -> EdsError;
    pub fn EdsDownloadCancel(inDirItemRef: EdsDirectoryItemRef) -> EdsError;
    pub fn EdsDownloadComplete(inDirItemRef: EdsDirectoryItemRef) -> EdsError;

    pub fn EdsCreateMemoryStream(inBufferSize: EdsUInt64, outStream: *mut EdsStreamRef)
        -> EdsError;
    pub fn EdsGetPointer(inStream: EdsStreamRef, outPointer: *mut *mut c_void) -> EdsError;
    pub fn EdsGetLength(inStream: EdsStreamRef, outLength: *mut EdsUInt64) -> EdsError;

    pub fn EdsCreateEvfImageRef(inStreamRef: EdsStreamRef, outEvfImageRef: *mut EdsEvfImageRef)
        -> EdsError;
    pub fn EdsDownloadEvfImage(inCameraRef: EdsCameraRef, inEvfImageRef: EdsEvfImageRef)
        -> EdsError;

    pub fn EdsSetObjectEventHandler(
        inCameraRef: EdsCameraRef,
        inEvent: EdsObjectEvent,
        inObjectEventHandler: Option<EdsObjectEventHandler>,
        inContext: *mut c_void,
    ) -> EdsError;
    pub fn EdsSetPropertyEventHandler(
        inCameraRef: EdsCameraRef,
        inEvent: EdsPropertyEvent,
        inPropertyEventHandler: Option<EdsPropertyEventHandler>,
        inContext: *mut c_void,
    ) -> EdsError;
    pub fn EdsSetCameraStateEventHandler(
        inCameraRef: EdsCameraRef,
        inEvent: EdsStateEvent,
        inStateEventHandler: Option<EdsStateEventHandler>,
        inContext: *mut c_void,
    ) -> EdsError;

    pub fn EdsGetEvent() -> EdsError;
}
