use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub motor: MotorConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Tuning knobs for the frame differencer.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// A sampled pixel counts as changed when `|prev - cur| > motion_threshold`.
    #[serde(default = "default_motion_threshold")]
    pub motion_threshold: u8,
    /// An object is reported only when strictly more samples than this changed.
    #[serde(default = "default_min_changed_pixels")]
    pub min_changed_pixels: u32,
    /// Row and column step for raw luma frames.
    #[serde(default = "default_raster_stride")]
    pub raster_stride: u32,
    /// Byte step for the compressed byte-stride strategy.
    #[serde(default = "default_compressed_stride")]
    pub compressed_stride: usize,
    /// Multiplier for the sqrt-area size heuristic.
    #[serde(default = "default_size_factor")]
    pub size_factor: f64,
    #[serde(default)]
    pub jpeg_strategy: JpegStrategy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JpegStrategy {
    /// Decode both JPEGs to luma and diff the rasters.
    #[default]
    Decode,
    /// Compare compressed bytes directly. Cheap and mostly meaningless.
    ByteStride,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_camera_link")]
    pub link: String,
    #[serde(default = "default_camera_mode")]
    pub mode: String,
    #[serde(default = "default_camera_url")]
    pub url: String,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_true")]
    pub detect: bool,
    /// Send every Nth captured frame as an image payload. 0 disables images.
    #[serde(default)]
    pub stream_every: u64,
    #[serde(default)]
    pub max_frames: Option<u64>,
    /// Pixels per frame the synthetic square moves.
    #[serde(default = "default_synthetic_speed")]
    pub synthetic_speed: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_host_camera_link")]
    pub camera_link: String,
    #[serde(default)]
    pub motor_link: Option<String>,
    #[serde(default = "default_width")]
    pub frame_width: u32,
    #[serde(default)]
    pub mirror: bool,
    #[serde(default = "default_resend_every")]
    pub resend_every: u32,
    #[serde(default = "default_chunk_timeout_ms")]
    pub chunk_timeout_ms: u64,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default)]
    pub snapshot_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotorConfig {
    #[serde(default = "default_motor_link")]
    pub link: String,
    #[serde(default = "default_move_duration_ms")]
    pub move_duration_ms: u64,
    #[serde(default = "default_speed")]
    pub speed: u8,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            motion_threshold: default_motion_threshold(),
            min_changed_pixels: default_min_changed_pixels(),
            raster_stride: default_raster_stride(),
            compressed_stride: default_compressed_stride(),
            size_factor: default_size_factor(),
            jpeg_strategy: JpegStrategy::default(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            link: default_camera_link(),
            mode: default_camera_mode(),
            url: default_camera_url(),
            fps: default_fps(),
            width: default_width(),
            height: default_height(),
            detect: true,
            stream_every: 0,
            max_frames: None,
            synthetic_speed: default_synthetic_speed(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            camera_link: default_host_camera_link(),
            motor_link: None,
            frame_width: default_width(),
            mirror: false,
            resend_every: default_resend_every(),
            chunk_timeout_ms: default_chunk_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
            snapshot_dir: None,
        }
    }
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            link: default_motor_link(),
            move_duration_ms: default_move_duration_ms(),
            speed: default_speed(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

// Default value functions
fn default_motion_threshold() -> u8 {
    30
}
fn default_min_changed_pixels() -> u32 {
    20
}
fn default_raster_stride() -> u32 {
    4
}
fn default_compressed_stride() -> usize {
    10
}
fn default_size_factor() -> f64 {
    4.0
}
fn default_camera_link() -> String {
    "tcp-listen://0.0.0.0:7000".into()
}
fn default_camera_mode() -> String {
    "synthetic".into()
}
fn default_camera_url() -> String {
    "http://192.168.1.100/stream".into()
}
fn default_fps() -> f64 {
    5.0
}
fn default_width() -> u32 {
    320
}
fn default_synthetic_speed() -> u32 {
    8
}
fn default_height() -> u32 {
    240
}
fn default_true() -> bool {
    true
}
fn default_host_camera_link() -> String {
    "tcp://127.0.0.1:7000".into()
}
fn default_resend_every() -> u32 {
    10
}
fn default_chunk_timeout_ms() -> u64 {
    2000
}
fn default_max_frame_bytes() -> usize {
    5 * 1024 * 1024
}
fn default_motor_link() -> String {
    "tcp-listen://0.0.0.0:7001".into()
}
fn default_move_duration_ms() -> u64 {
    500
}
fn default_speed() -> u8 {
    200
}
fn default_tick_ms() -> u64 {
    20
}
fn default_api_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".into()
}
