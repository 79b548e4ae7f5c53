use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::db::hardware_names;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub geo: GeoConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory of pre-built pages served for any unmatched path
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            static_dir: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Admin account created at startup if it does not exist yet
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    /// Argon2 memory cost in KiB
    #[serde(default = "default_hash_memory_kib")]
    pub hash_memory_kib: u32,
    /// Argon2 iteration count
    #[serde(default = "default_hash_iterations")]
    pub hash_iterations: u32,
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
    /// Mark the session cookie `Secure` (set when served behind TLS)
    #[serde(default)]
    pub cookie_secure: bool,
    #[serde(default = "default_session_cleanup_interval")]
    pub session_cleanup_interval: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_username: None,
            admin_password: None,
            hash_memory_kib: default_hash_memory_kib(),
            hash_iterations: default_hash_iterations(),
            session_ttl_hours: default_session_ttl_hours(),
            cookie_secure: false,
            session_cleanup_interval: default_session_cleanup_interval(),
        }
    }
}

fn default_hash_memory_kib() -> u32 {
    argon2::Params::DEFAULT_M_COST
}

fn default_hash_iterations() -> u32 {
    argon2::Params::DEFAULT_T_COST
}

fn default_session_ttl_hours() -> i64 {
    24 * 7
}

fn default_session_cleanup_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Login attempts allowed per client IP in one window
    #[serde(default = "default_login_attempts")]
    pub login_attempts_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_rate_limit_cleanup")]
    pub cleanup_interval: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            login_attempts_per_window: default_login_attempts(),
            window_seconds: default_window_seconds(),
            cleanup_interval: default_rate_limit_cleanup(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_login_attempts() -> u32 {
    20
}

fn default_window_seconds() -> u64 {
    60
}

fn default_rate_limit_cleanup() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeoConfig {
    /// Service returning the caller's public address as plain text
    #[serde(default = "default_public_ip_url")]
    pub public_ip_url: String,
    /// Geolocation endpoint; `{ip}` is replaced with the address
    #[serde(default = "default_geo_url")]
    pub geo_url: String,
    #[serde(default = "default_geo_timeout")]
    pub timeout_secs: u64,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            public_ip_url: default_public_ip_url(),
            geo_url: default_geo_url(),
            timeout_secs: default_geo_timeout(),
        }
    }
}

fn default_public_ip_url() -> String {
    "https://api.ipify.org".to_string()
}

fn default_geo_url() -> String {
    "http://ipinfo.io/{ip}/json".to_string()
}

fn default_geo_timeout() -> u64 {
    3
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RelayDriverType {
    /// No relay attached; every toggle reports a hardware fault
    None,
    /// Linux sysfs GPIO interface
    Sysfs,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_driver")]
    pub driver: RelayDriverType,
    #[serde(default = "default_gpio_root")]
    pub gpio_root: PathBuf,
    #[serde(default = "default_relay_pin")]
    pub pin: u32,
    #[serde(default = "default_true")]
    pub active_high: bool,
    /// How long the relay is held closed
    #[serde(default = "default_pulse_ms")]
    pub pulse_ms: u64,
    /// Name recorded in the hardware log for every toggle
    #[serde(default = "default_relay_name")]
    pub hardware_name: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            driver: default_relay_driver(),
            gpio_root: default_gpio_root(),
            pin: default_relay_pin(),
            active_high: true,
            pulse_ms: default_pulse_ms(),
            hardware_name: default_relay_name(),
        }
    }
}

fn default_relay_driver() -> RelayDriverType {
    RelayDriverType::None
}

fn default_gpio_root() -> PathBuf {
    PathBuf::from("/sys/class/gpio")
}

fn default_relay_pin() -> u32 {
    17
}

fn default_pulse_ms() -> u64 {
    500
}

fn default_relay_name() -> String {
    hardware_names::GARAGE_DOOR.to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CameraSourceType {
    None,
    /// Camera attached to this machine, read through a capture command
    Local,
    /// MJPEG stream served by another host on the LAN
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_camera_source")]
    pub source: CameraSourceType,
    #[serde(default = "default_capture_command")]
    pub capture_command: String,
    #[serde(default = "default_capture_args")]
    pub capture_args: Vec<String>,
    /// Upstream MJPEG URL, e.g. `http://192.168.1.117:8080/?action=stream`
    pub remote_url: Option<String>,
    /// Frames larger than this are discarded as corrupt
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default = "default_camera_name")]
    pub hardware_name: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: default_camera_source(),
            capture_command: default_capture_command(),
            capture_args: default_capture_args(),
            remote_url: None,
            max_frame_bytes: default_max_frame_bytes(),
            hardware_name: default_camera_name(),
        }
    }
}

fn default_camera_source() -> CameraSourceType {
    CameraSourceType::None
}

fn default_capture_command() -> String {
    "rpicam-vid".to_string()
}

fn default_capture_args() -> Vec<String> {
    ["--codec", "mjpeg", "--nopreview", "-t", "0", "-o", "-"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_frame_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_camera_name() -> String {
    hardware_names::GARAGE_CAMERA.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse configuration file")
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            geo: GeoConfig::default(),
            relay: RelayConfig::default(),
            camera: CameraConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
