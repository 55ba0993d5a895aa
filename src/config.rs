//! Configuration for the camera server

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::path::Path;
use thiserror::Error;

use crate::camera::{PixelFormat, MAX_FRAME_SIZE};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub camera: CameraConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub gpio: GpioConfig,
}

/// HTTP listeners
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address both listeners bind to
    #[serde(default = "default_bind_ip")]
    pub bind_ip: IpAddr,

    /// Port of the control server (page, status, commands, relays)
    #[serde(default = "default_control_port")]
    pub control_port: u16,

    /// Port of the MJPEG stream server
    #[serde(default = "default_stream_port")]
    pub stream_port: u16,

    /// Host name or address shown in startup logs; detected when unset
    #[serde(default)]
    pub public_host: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
            control_port: default_control_port(),
            stream_port: default_stream_port(),
            public_host: None,
        }
    }
}

/// Where frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraSource {
    /// Generated test pattern
    Simulated,
    /// V4L2 device through a GStreamer pipeline
    Gstreamer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_camera_source")]
    pub source: CameraSource,

    /// Video device for the GStreamer source
    #[serde(default = "default_device")]
    pub device: String,

    #[serde(default = "default_pixel_format")]
    pub pixel_format: PixelFormat,

    /// Initial `framesize` index
    #[serde(default = "default_frame_size")]
    pub frame_size: i32,

    /// Initial sensor JPEG quality, 0-63, lower is better
    #[serde(default = "default_sensor_quality")]
    pub quality: i32,

    /// Number of frame buffers
    #[serde(default = "default_fb_count")]
    pub fb_count: usize,

    /// Capture rate; 0 lets the simulated source run unthrottled
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// How long acquisition waits for a free frame buffer
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: default_camera_source(),
            device: default_device(),
            pixel_format: default_pixel_format(),
            frame_size: default_frame_size(),
            quality: default_sensor_quality(),
            fb_count: default_fb_count(),
            fps: default_fps(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// JPEG quality (1-100) for frames the sensor delivers raw
    #[serde(default = "default_encode_quality")]
    pub encode_quality: u8,

    /// Frame interval smoothing window; 0 disables smoothing
    #[serde(default = "default_average_window")]
    pub average_window: usize,

    /// Body chunks buffered per client before the encoder waits
    #[serde(default = "default_channel_depth")]
    pub channel_depth: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            encode_quality: default_encode_quality(),
            average_window: default_average_window(),
            channel_depth: default_channel_depth(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpioBackend {
    /// Levels kept in memory
    Memory,
    /// Raspberry Pi header through rppal
    Rppal,
}

/// Relay and LED pin numbers (BCM)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpioConfig {
    #[serde(default = "default_gpio_backend")]
    pub backend: GpioBackend,

    #[serde(default = "default_relay1")]
    pub relay1: u8,

    #[serde(default = "default_relay3")]
    pub relay3: u8,

    #[serde(default = "default_relay5")]
    pub relay5: u8,

    #[serde(default = "default_relay7")]
    pub relay7: u8,

    #[serde(default = "default_led")]
    pub led: u8,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            backend: default_gpio_backend(),
            relay1: default_relay1(),
            relay3: default_relay3(),
            relay5: default_relay5(),
            relay7: default_relay7(),
            led: default_led(),
        }
    }
}

// Default value functions
fn default_bind_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_control_port() -> u16 {
    80
}
fn default_stream_port() -> u16 {
    81
}
fn default_camera_source() -> CameraSource {
    CameraSource::Simulated
}
fn default_device() -> String {
    "/dev/video0".to_string()
}
fn default_pixel_format() -> PixelFormat {
    PixelFormat::Jpeg
}
fn default_frame_size() -> i32 {
    8
}
fn default_sensor_quality() -> i32 {
    12
}
fn default_fb_count() -> usize {
    2
}
fn default_fps() -> u32 {
    25
}
fn default_acquire_timeout_ms() -> u64 {
    4000
}
fn default_encode_quality() -> u8 {
    crate::encoder::DEFAULT_QUALITY
}
fn default_average_window() -> usize {
    crate::filter::DEFAULT_WINDOW
}
fn default_channel_depth() -> usize {
    2
}
fn default_gpio_backend() -> GpioBackend {
    GpioBackend::Memory
}
fn default_relay1() -> u8 {
    14
}
fn default_relay3() -> u8 {
    15
}
fn default_relay5() -> u8 {
    13
}
fn default_relay7() -> u8 {
    12
}
fn default_led() -> u8 {
    4
}

impl Config {
    /// Loads configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Loads configuration from TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let server = &self.server;
        if server.control_port != 0 && server.control_port == server.stream_port {
            return Err(ConfigError::Invalid(format!(
                "control and stream servers cannot share port {}",
                server.control_port
            )));
        }

        let cam = &self.camera;
        if !(0..=MAX_FRAME_SIZE).contains(&cam.frame_size) {
            return Err(ConfigError::Invalid(format!(
                "camera.frame_size must be between 0 and {}, got {}",
                MAX_FRAME_SIZE, cam.frame_size
            )));
        }

        if !(0..=63).contains(&cam.quality) {
            return Err(ConfigError::Invalid(format!(
                "camera.quality must be between 0 and 63, got {}",
                cam.quality
            )));
        }

        if cam.fb_count == 0 {
            return Err(ConfigError::Invalid("camera.fb_count must be > 0".to_string()));
        }

        let stream = &self.stream;
        if stream.encode_quality == 0 || stream.encode_quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "stream.encode_quality must be between 1 and 100, got {}",
                stream.encode_quality
            )));
        }

        if stream.channel_depth == 0 {
            return Err(ConfigError::Invalid(
                "stream.channel_depth must be > 0".to_string(),
            ));
        }

        let gpio = &self.gpio;
        let mut pins = vec![gpio.relay1, gpio.relay3, gpio.relay5, gpio.relay7, gpio.led];
        pins.sort_unstable();
        if let Some(pair) = pins.windows(2).find(|w| w[0] == w[1]) {
            return Err(ConfigError::Invalid(format!(
                "GPIO pin {} is assigned twice",
                pair[0]
            )));
        }

        Ok(())
    }

    /// Saves configuration to TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.bind_ip, self.server.control_port)
    }

    pub fn stream_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.bind_ip, self.server.stream_port)
    }

    /// Host clients should use to reach this server
    pub fn public_host(&self) -> String {
        self.server.public_host.clone().unwrap_or_else(local_ip)
    }
}

/// Address of the interface holding the default route, or `localhost`
fn local_ip() -> String {
    if let Ok(socket) = UdpSocket::bind("0.0.0.0:0") {
        if socket.connect("8.8.8.8:80").is_ok() {
            if let Ok(addr) = socket.local_addr() {
                return addr.ip().to_string();
            }
        }
    }

    "localhost".to_string()
}
