//! Exposure property snapshot and display labels for vendor property codes.

use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::hardware::{PropertyId, PropertyValue};
use edsdk_sys as sys;
use serde::Serialize;
use std::fmt;

/// Current exposure-related settings. `None` where the camera does not expose the
/// property in its current mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExposureSettings {
    /// `kEdsPropID_AEMode`
    pub ae_mode: Option<u32>,
    /// `kEdsPropID_Tv`
    pub tv: Option<u32>,
    /// `kEdsPropID_Av`
    pub av: Option<u32>,
    /// `kEdsPropID_ISOSpeed`
    pub iso: Option<u32>,
    /// `kEdsPropID_MeteringMode`
    pub metering_mode: Option<u32>,
    /// `kEdsPropID_ExposureCompensation`
    pub exposure_compensation: Option<u32>,
    /// `kEdsPropID_ImageQuality`
    pub image_quality: Option<u32>,
}

impl ExposureSettings {
    /// Properties read to build a snapshot, in read order.
    pub const PROPERTIES: [PropertyId; 7] = [
        PropertyId::AE_MODE,
        PropertyId::TV,
        PropertyId::AV,
        PropertyId::ISO_SPEED,
        PropertyId::METERING_MODE,
        PropertyId::EXPOSURE_COMPENSATION,
        PropertyId::IMAGE_QUALITY,
    ];

    /// Record the result of reading `property`. Unavailable properties become
    /// `None`; any other failure is returned.
    pub fn apply(
        &mut self,
        property: PropertyId,
        read: EngineResult<PropertyValue>,
    ) -> EngineResult<()> {
        let value = match read {
            Ok(value) => value.as_u32(),
            Err(e) if is_unavailable(&e) => None,
            Err(e) => return Err(e),
        };
        let slot = match property {
            PropertyId::AE_MODE => &mut self.ae_mode,
            PropertyId::TV => &mut self.tv,
            PropertyId::AV => &mut self.av,
            PropertyId::ISO_SPEED => &mut self.iso,
            PropertyId::METERING_MODE => &mut self.metering_mode,
            PropertyId::EXPOSURE_COMPENSATION => &mut self.exposure_compensation,
            PropertyId::IMAGE_QUALITY => &mut self.image_quality,
            _ => return Ok(()),
        };
        *slot = value;
        Ok(())
    }
}

fn is_unavailable(error: &EngineError) -> bool {
    error.kind() == Some(ErrorKind::NotSupported)
        || error.code() == Some(sys::EDS_ERR_PROPERTIES_UNAVAILABLE)
}

impl fmt::Display for ExposureSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn show(f: &mut fmt::Formatter<'_>, name: &str, value: Option<String>) -> fmt::Result {
            writeln!(f, "{name:<14} {}", value.as_deref().unwrap_or("-"))
        }
        show(f, "Mode", self.ae_mode.map(ae_mode_label))?;
        show(f, "Shutter", self.tv.map(tv_label))?;
        show(f, "Aperture", self.av.map(av_label))?;
        show(f, "ISO", self.iso.map(iso_label))?;
        show(f, "Metering", self.metering_mode.map(metering_label))?;
        show(
            f,
            "Exposure comp",
            self.exposure_compensation.map(exposure_comp_label),
        )?;
        show(f, "Quality", self.image_quality.map(|q| format!("0x{q:08X}")))
    }
}

const ISO_LABELS: &[(u32, &str)] = &[
    (0x00, "Auto"),
    (0x40, "50"),
    (0x48, "100"),
    (0x4B, "125"),
    (0x4D, "160"),
    (0x50, "200"),
    (0x53, "250"),
    (0x55, "320"),
    (0x58, "400"),
    (0x5B, "500"),
    (0x5D, "640"),
    (0x60, "800"),
    (0x63, "1000"),
    (0x65, "1250"),
    (0x68, "1600"),
    (0x6B, "2000"),
    (0x6D, "2500"),
    (0x70, "3200"),
    (0x73, "4000"),
    (0x75, "5000"),
    (0x78, "6400"),
    (0x7B, "8000"),
    (0x7D, "10000"),
    (0x80, "12800"),
    (0x83, "16000"),
    (0x85, "20000"),
    (0x88, "25600"),
    (0x8B, "32000"),
    (0x8D, "40000"),
    (0x90, "51200"),
    (0x98, "102400"),
];

const AV_LABELS: &[(u32, &str)] = &[
    (0x08, "1.0"),
    (0x0B, "1.1"),
    (0x0C, "1.2"),
    (0x0D, "1.2"),
    (0x10, "1.4"),
    (0x13, "1.6"),
    (0x14, "1.8"),
    (0x15, "1.8"),
    (0x18, "2.0"),
    (0x1B, "2.2"),
    (0x1C, "2.5"),
    (0x1D, "2.5"),
    (0x20, "2.8"),
    (0x23, "3.2"),
    (0x24, "3.5"),
    (0x25, "3.5"),
    (0x28, "4.0"),
    (0x2B, "4.5"),
    (0x2C, "4.5"),
    (0x2D, "5.0"),
    (0x30, "5.6"),
    (0x33, "6.3"),
    (0x34, "6.7"),
    (0x35, "7.1"),
    (0x38, "8.0"),
    (0x3B, "9.0"),
    (0x3C, "9.5"),
    (0x3D, "10"),
    (0x40, "11"),
    (0x43, "13"),
    (0x44, "13"),
    (0x45, "14"),
    (0x48, "16"),
    (0x4B, "18"),
    (0x4C, "19"),
    (0x4D, "20"),
    (0x50, "22"),
    (0x53, "25"),
    (0x54, "27"),
    (0x55, "29"),
    (0x58, "32"),
];

const TV_LABELS: &[(u32, &str)] = &[
    (0x04, "Auto"),
    (0x0C, "Bulb"),
    (0x10, "30\""),
    (0x13, "25\""),
    (0x14, "20\""),
    (0x15, "20\""),
    (0x18, "15\""),
    (0x1B, "13\""),
    (0x1C, "10\""),
    (0x1D, "10\""),
    (0x20, "8\""),
    (0x23, "6\""),
    (0x24, "6\""),
    (0x25, "5\""),
    (0x28, "4\""),
    (0x2B, "3\"2"),
    (0x2C, "3\""),
    (0x2D, "2\"5"),
    (0x30, "2\""),
    (0x33, "1\"6"),
    (0x34, "1\"5"),
    (0x35, "1\"3"),
    (0x38, "1\""),
    (0x3B, "0\"8"),
    (0x3C, "0\"7"),
    (0x3D, "0\"6"),
    (0x40, "0\"5"),
    (0x43, "0\"4"),
    (0x44, "0\"3"),
    (0x45, "0\"3"),
    (0x48, "1/4"),
    (0x4B, "1/5"),
    (0x4C, "1/6"),
    (0x4D, "1/6"),
    (0x50, "1/8"),
    (0x53, "1/10"),
    (0x54, "1/10"),
    (0x55, "1/13"),
    (0x58, "1/15"),
    (0x5B, "1/20"),
    (0x5C, "1/20"),
    (0x5D, "1/25"),
    (0x60, "1/30"),
    (0x63, "1/40"),
    (0x64, "1/45"),
    (0x65, "1/50"),
    (0x68, "1/60"),
    (0x6B, "1/80"),
    (0x6C, "1/90"),
    (0x6D, "1/100"),
    (0x70, "1/125"),
    (0x73, "1/160"),
    (0x74, "1/180"),
    (0x75, "1/200"),
    (0x78, "1/250"),
    (0x7B, "1/320"),
    (0x7C, "1/350"),
    (0x7D, "1/400"),
    (0x80, "1/500"),
    (0x83, "1/640"),
    (0x84, "1/750"),
    (0x85, "1/800"),
    (0x88, "1/1000"),
    (0x8B, "1/1250"),
    (0x8C, "1/1500"),
    (0x8D, "1/1600"),
    (0x90, "1/2000"),
    (0x93, "1/2500"),
    (0x94, "1/3000"),
    (0x95, "1/3200"),
    (0x98, "1/4000"),
    (0x9B, "1/5000"),
    (0x9C, "1/6000"),
    (0x9D, "1/6400"),
    (0xA0, "1/8000"),
];

const AE_MODE_LABELS: &[(u32, &str)] = &[
    (0, "P"),
    (1, "Tv"),
    (2, "Av"),
    (3, "M"),
    (4, "Bulb"),
    (5, "A-DEP"),
    (6, "DEP"),
    (7, "Custom"),
    (8, "Lock"),
    (9, "Green"),
    (10, "Night Portrait"),
    (11, "Sports"),
    (12, "Portrait"),
    (13, "Landscape"),
    (14, "Close-Up"),
    (15, "Flash Off"),
    (19, "Creative Auto"),
    (22, "Scene Intelligent Auto"),
];

const METERING_LABELS: &[(u32, &str)] = &[
    (1, "Spot"),
    (3, "Evaluative"),
    (4, "Partial"),
    (5, "Center-weighted"),
];

fn lookup(table: &[(u32, &'static str)], code: u32) -> Option<&'static str> {
    table
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, label)| *label)
}

/// ISO code as text, e.g. `ISO 400`. Unknown codes print in hex.
pub fn iso_label(code: u32) -> String {
    match lookup(ISO_LABELS, code) {
        Some(label) => format!("ISO {label}"),
        None => format!("ISO 0x{code:02X}"),
    }
}

/// Aperture code as text, e.g. `f/5.6`.
pub fn av_label(code: u32) -> String {
    match lookup(AV_LABELS, code) {
        Some(label) => format!("f/{label}"),
        None => format!("Av 0x{code:02X}"),
    }
}

/// Shutter speed code as text, e.g. `1/250`.
pub fn tv_label(code: u32) -> String {
    lookup(TV_LABELS, code).map_or_else(|| format!("Tv 0x{code:02X}"), str::to_owned)
}

/// Shooting mode code as text, e.g. `Av`.
pub fn ae_mode_label(code: u32) -> String {
    lookup(AE_MODE_LABELS, code).map_or_else(|| format!("Mode {code}"), str::to_owned)
}

/// Metering mode code as text.
pub fn metering_label(code: u32) -> String {
    lookup(METERING_LABELS, code).map_or_else(|| format!("Metering {code}"), str::to_owned)
}

/// Exposure compensation codes are signed eighths of a stop in the low byte, with
/// thirds encoded as 3 and 5.
pub fn exposure_comp_label(code: u32) -> String {
    let eighths = i32::from((code & 0xFF) as u8 as i8);
    if eighths == 0 {
        return "0".to_string();
    }
    let sign = if eighths < 0 { '-' } else { '+' };
    let magnitude = eighths.abs();
    let whole = magnitude / 8;
    let fraction = match magnitude % 8 {
        0 => "",
        3 => "1/3",
        4 => "1/2",
        5 => "2/3",
        _ => return format!("{sign}{magnitude}/8"),
    };
    match (whole, fraction) {
        (0, fraction) => format!("{sign}{fraction}"),
        (whole, "") => format!("{sign}{whole}"),
        (whole, fraction) => format!("{sign}{whole} {fraction}"),
    }
}

/// Label for a value of `property`, when it has a known table.
pub fn label_for(property: PropertyId, code: u32) -> Option<String> {
    let label = match property {
        PropertyId::ISO_SPEED => iso_label(code),
        PropertyId::AV => av_label(code),
        PropertyId::TV => tv_label(code),
        PropertyId::AE_MODE | PropertyId::AE_MODE_SELECT => ae_mode_label(code),
        PropertyId::METERING_MODE => metering_label(code),
        PropertyId::EXPOSURE_COMPENSATION => exposure_comp_label(code),
        _ => return None,
    };
    Some(label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SdkError;

    #[test]
    fn test_labels() {
        assert_eq!(iso_label(0x48), "ISO 100");
        assert_eq!(iso_label(0x00), "ISO Auto");
        assert_eq!(av_label(0x30), "f/5.6");
        assert_eq!(tv_label(0x60), "1/30");
        assert_eq!(ae_mode_label(3), "M");
        assert_eq!(metering_label(3), "Evaluative");
        assert_eq!(iso_label(0x01), "ISO 0x01");
    }

    #[test]
    fn test_exposure_comp_labels() {
        assert_eq!(exposure_comp_label(0x00), "0");
        assert_eq!(exposure_comp_label(0x08), "+1");
        assert_eq!(exposure_comp_label(0x0B), "+1 1/3");
        assert_eq!(exposure_comp_label(0x05), "+2/3");
        assert_eq!(exposure_comp_label(0xF8), "-1");
        assert_eq!(exposure_comp_label(0xEB), "-2 2/3");
    }

    #[test]
    fn test_unavailable_property_is_none() {
        let mut settings = ExposureSettings::default();
        settings
            .apply(PropertyId::ISO_SPEED, Ok(PropertyValue::UInt32(0x48)))
            .unwrap();
        let unavailable =
            SdkError::from_status(sys::EDS_ERR_PROPERTIES_UNAVAILABLE, "GetProperty");
        settings
            .apply(PropertyId::TV, Err(EngineError::Sdk(unavailable)))
            .unwrap();
        assert_eq!(settings.iso, Some(0x48));
        assert_eq!(settings.tv, None);

        let lost = SdkError::from_status(sys::EDS_ERR_COMM_DISCONNECTED, "GetProperty");
        assert!(settings
            .apply(PropertyId::AV, Err(EngineError::Sdk(lost)))
            .is_err());
    }
}
