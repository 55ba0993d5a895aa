//! Sensor controls and status
//!
//! `/cmd` addresses controls by name; `/status` reports the current register
//! values as a flat JSON object. The key order of [`SensorStatus`] is part of
//! the HTTP contract.

use parking_lot::RwLock;
use serde::Serialize;
use std::str::FromStr;
use thiserror::Error;

use super::{PixelFormat, MAX_FRAME_SIZE};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SensorError {
    #[error("unknown control: {0}")]
    UnknownControl(String),

    #[error("{control} out of range: {value} (expected {min}..={max})")]
    OutOfRange {
        control: &'static str,
        value: i32,
        min: i32,
        max: i32,
    },
}

/// A settable sensor control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    FrameSize,
    Quality,
    Contrast,
    Brightness,
    Saturation,
    GainCeiling,
    ColorBar,
    Awb,
    Agc,
    Aec,
    HMirror,
    VFlip,
    AwbGain,
    AgcGain,
    AecValue,
    Aec2,
    Dcw,
    Bpc,
    Wpc,
    RawGma,
    Lenc,
    SpecialEffect,
    WbMode,
    AeLevel,
}

impl Control {
    pub const ALL: [Control; 24] = [
        Control::FrameSize,
        Control::Quality,
        Control::Contrast,
        Control::Brightness,
        Control::Saturation,
        Control::GainCeiling,
        Control::ColorBar,
        Control::Awb,
        Control::Agc,
        Control::Aec,
        Control::HMirror,
        Control::VFlip,
        Control::AwbGain,
        Control::AgcGain,
        Control::AecValue,
        Control::Aec2,
        Control::Dcw,
        Control::Bpc,
        Control::Wpc,
        Control::RawGma,
        Control::Lenc,
        Control::SpecialEffect,
        Control::WbMode,
        Control::AeLevel,
    ];

    /// Name used in `/cmd?var=`
    pub fn name(self) -> &'static str {
        match self {
            Control::FrameSize => "framesize",
            Control::Quality => "quality",
            Control::Contrast => "contrast",
            Control::Brightness => "brightness",
            Control::Saturation => "saturation",
            Control::GainCeiling => "gainceiling",
            Control::ColorBar => "colorbar",
            Control::Awb => "awb",
            Control::Agc => "agc",
            Control::Aec => "aec",
            Control::HMirror => "hmirror",
            Control::VFlip => "vflip",
            Control::AwbGain => "awb_gain",
            Control::AgcGain => "agc_gain",
            Control::AecValue => "aec_value",
            Control::Aec2 => "aec2",
            Control::Dcw => "dcw",
            Control::Bpc => "bpc",
            Control::Wpc => "wpc",
            Control::RawGma => "raw_gma",
            Control::Lenc => "lenc",
            Control::SpecialEffect => "special_effect",
            Control::WbMode => "wb_mode",
            Control::AeLevel => "ae_level",
        }
    }

    /// Accepted value range, `None` for on/off controls
    pub fn range(self) -> Option<(i32, i32)> {
        match self {
            Control::FrameSize => Some((0, MAX_FRAME_SIZE)),
            Control::Quality => Some((0, 63)),
            Control::Contrast | Control::Brightness | Control::Saturation | Control::AeLevel => {
                Some((-2, 2))
            }
            Control::GainCeiling => Some((0, 6)),
            Control::SpecialEffect => Some((0, 6)),
            Control::WbMode => Some((0, 4)),
            Control::AecValue => Some((0, 1200)),
            Control::AgcGain => Some((0, 30)),
            _ => None,
        }
    }
}

impl FromStr for Control {
    type Err = SensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Control::ALL
            .iter()
            .copied()
            .find(|c| c.name() == s)
            .ok_or_else(|| SensorError::UnknownControl(s.to_string()))
    }
}

/// Register snapshot served by `/status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SensorStatus {
    pub framesize: i32,
    pub quality: i32,
    pub brightness: i32,
    pub contrast: i32,
    pub saturation: i32,
    pub special_effect: i32,
    pub wb_mode: i32,
    pub awb: i32,
    pub awb_gain: i32,
    pub aec: i32,
    pub aec2: i32,
    pub ae_level: i32,
    pub aec_value: i32,
    pub agc: i32,
    pub agc_gain: i32,
    pub gainceiling: i32,
    pub bpc: i32,
    pub wpc: i32,
    pub raw_gma: i32,
    pub lenc: i32,
    pub hmirror: i32,
    pub dcw: i32,
    pub colorbar: i32,
}

/// JSON keys of [`SensorStatus`], in serialization order
pub const STATUS_KEYS: [&str; 23] = [
    "framesize",
    "quality",
    "brightness",
    "contrast",
    "saturation",
    "special_effect",
    "wb_mode",
    "awb",
    "awb_gain",
    "aec",
    "aec2",
    "ae_level",
    "aec_value",
    "agc",
    "agc_gain",
    "gainceiling",
    "bpc",
    "wpc",
    "raw_gma",
    "lenc",
    "hmirror",
    "dcw",
    "colorbar",
];

impl SensorStatus {
    /// Power-on register values
    pub fn power_on(framesize: i32, quality: i32) -> Self {
        Self {
            framesize,
            quality,
            brightness: 0,
            contrast: 0,
            saturation: 0,
            special_effect: 0,
            wb_mode: 0,
            awb: 1,
            awb_gain: 1,
            aec: 1,
            aec2: 0,
            ae_level: 0,
            aec_value: 168,
            agc: 1,
            agc_gain: 0,
            gainceiling: 0,
            bpc: 0,
            wpc: 1,
            raw_gma: 1,
            lenc: 1,
            hmirror: 0,
            dcw: 1,
            colorbar: 0,
        }
    }
}

/// Sensor register access
pub trait Sensor: Send + Sync {
    fn pixel_format(&self) -> PixelFormat;

    fn status(&self) -> SensorStatus;

    fn vflip(&self) -> bool;

    /// Applies one control value
    fn apply(&self, control: Control, value: i32) -> Result<(), SensorError>;
}

#[derive(Debug, Clone, Copy)]
struct Registers {
    status: SensorStatus,
    vflip: i32,
}

/// In-memory register file with range checking
#[derive(Debug)]
pub struct SensorState {
    pixel_format: PixelFormat,
    registers: RwLock<Registers>,
}

impl SensorState {
    pub fn new(pixel_format: PixelFormat, framesize: i32, quality: i32) -> Self {
        Self {
            pixel_format,
            registers: RwLock::new(Registers {
                status: SensorStatus::power_on(framesize, quality),
                vflip: 0,
            }),
        }
    }
}

impl Sensor for SensorState {
    fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn status(&self) -> SensorStatus {
        self.registers.read().status
    }

    fn vflip(&self) -> bool {
        self.registers.read().vflip != 0
    }

    fn apply(&self, control: Control, value: i32) -> Result<(), SensorError> {
        // Frame size only switches while the sensor itself produces JPEG
        if control == Control::FrameSize && !self.pixel_format.is_jpeg() {
            return Ok(());
        }

        let value = match control.range() {
            Some((min, max)) if !(min..=max).contains(&value) => {
                return Err(SensorError::OutOfRange {
                    control: control.name(),
                    value,
                    min,
                    max,
                });
            }
            Some(_) => value,
            None => i32::from(value != 0),
        };

        let mut guard = self.registers.write();
        let regs = &mut *guard;
        let s = &mut regs.status;
        match control {
            Control::FrameSize => s.framesize = value,
            Control::Quality => s.quality = value,
            Control::Contrast => s.contrast = value,
            Control::Brightness => s.brightness = value,
            Control::Saturation => s.saturation = value,
            Control::GainCeiling => s.gainceiling = value,
            Control::ColorBar => s.colorbar = value,
            Control::Awb => s.awb = value,
            Control::Agc => s.agc = value,
            Control::Aec => s.aec = value,
            Control::HMirror => s.hmirror = value,
            Control::VFlip => regs.vflip = value,
            Control::AwbGain => s.awb_gain = value,
            Control::AgcGain => s.agc_gain = value,
            Control::AecValue => s.aec_value = value,
            Control::Aec2 => s.aec2 = value,
            Control::Dcw => s.dcw = value,
            Control::Bpc => s.bpc = value,
            Control::Wpc => s.wpc = value,
            Control::RawGma => s.raw_gma = value,
            Control::Lenc => s.lenc = value,
            Control::SpecialEffect => s.special_effect = value,
            Control::WbMode => s.wb_mode = value,
            Control::AeLevel => s.ae_level = value,
        }

        Ok(())
    }
}
