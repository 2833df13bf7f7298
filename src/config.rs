use crate::error::{Result, SinkError};
use crate::hls::location::SegmentLocation;
use crate::hls::playlist::{DEFAULT_PLAYLIST_VERSION, EncryptionMethod, ProgramDateTimeMode};
use chrono::TimeDelta;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;
use url::Url;

pub const DEFAULT_SEGMENT_LOCATION: &str = "segment%05d.ts";
pub const DEFAULT_PLAYLIST_LOCATION: &str = "playlist.m3u8";
pub const DEFAULT_MAX_FILES: usize = 10;
pub const DEFAULT_TARGET_DURATION: Duration = Duration::from_secs(15);
pub const DEFAULT_PLAYLIST_LENGTH: usize = 5;
pub const DEFAULT_KEY_LOCATION: &str = "playlist.key";
pub const DEFAULT_KEY_URI: &str = "playlist.key";

/// Settings consumed by the segment controller and playlist.
///
/// Fields are plain data; every mutation from outside the controller goes
/// through [`SinkSettings::validate`] before it is applied.
#[derive(Clone, Debug, PartialEq)]
pub struct SinkSettings {
    /// printf-style segment file template, e.g. `segment%05d.ts`
    pub segment_location: String,
    /// Where the rendered manifest is written
    pub playlist_location: PathBuf,
    /// Prefix for segment URLs in the manifest (path or absolute URL)
    pub playlist_root: Option<String>,
    /// Segment files kept on disk (0 = keep all)
    pub max_files: usize,
    /// Sliding window size (0 = unbounded)
    pub playlist_length: usize,
    /// Segment length the controller asks for (zero = boundaries driven externally)
    pub target_duration: Duration,
    /// End the playlist on stop instead of continuing it with a discontinuity
    pub reset_on_stop: bool,
    pub encryption: EncryptionMethod,
    /// Key material read at session start
    pub key_location: PathBuf,
    /// Key reference advertised to players
    pub key_uri: String,
    pub program_date_time_mode: ProgramDateTimeMode,
    /// Fixed offset added to every program date time
    pub program_date_time_shift: TimeDelta,
    pub playlist_version: u32,
    pub start_media_sequence: u32,
    pub start_discontinuity_sequence: u64,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            segment_location: DEFAULT_SEGMENT_LOCATION.to_string(),
            playlist_location: PathBuf::from(DEFAULT_PLAYLIST_LOCATION),
            playlist_root: None,
            max_files: DEFAULT_MAX_FILES,
            playlist_length: DEFAULT_PLAYLIST_LENGTH,
            target_duration: DEFAULT_TARGET_DURATION,
            reset_on_stop: true,
            encryption: EncryptionMethod::None,
            key_location: PathBuf::from(DEFAULT_KEY_LOCATION),
            key_uri: DEFAULT_KEY_URI.to_string(),
            program_date_time_mode: ProgramDateTimeMode::Never,
            program_date_time_shift: TimeDelta::zero(),
            playlist_version: DEFAULT_PLAYLIST_VERSION,
            start_media_sequence: 0,
            start_discontinuity_sequence: 0,
        }
    }
}

impl SinkSettings {
    /// Check the settings and return the parsed segment template.
    pub fn validate(&self) -> Result<SegmentLocation> {
        let location = SegmentLocation::parse(&self.segment_location)?;

        if self.playlist_location.as_os_str().is_empty() {
            return Err(SinkError::InvalidConfig(
                "playlist location must not be empty".to_string(),
            ));
        }

        if let Some(root) = &self.playlist_root
            && root.contains("://")
        {
            Url::parse(root).map_err(|e| {
                SinkError::InvalidConfig(format!("Invalid playlist root '{}': {}", root, e))
            })?;
        }

        if self.playlist_version == 0 {
            return Err(SinkError::InvalidConfig(
                "playlist version must be at least 1".to_string(),
            ));
        }

        if self.start_media_sequence == u32::MAX {
            return Err(SinkError::InvalidConfig(format!(
                "start media sequence {} leaves no room for a following segment",
                self.start_media_sequence
            )));
        }

        if self.encryption.is_enabled() && self.key_uri.is_empty() {
            return Err(SinkError::InvalidConfig(
                "key URI is required when encryption is enabled".to_string(),
            ));
        }

        if self.max_files > 0 && self.playlist_length > 0 && self.max_files < self.playlist_length
        {
            warn!(
                "max_files ({}) is smaller than playlist_length ({}): advertised segments will be deleted",
                self.max_files, self.playlist_length
            );
        }

        Ok(location)
    }
}

impl FromStr for EncryptionMethod {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" | "" => Ok(EncryptionMethod::None),
            "aes-128" | "aes128" => Ok(EncryptionMethod::Aes128),
            other => Err(SinkError::InvalidConfig(format!(
                "Unknown encryption method '{}'",
                other
            ))),
        }
    }
}

impl FromStr for ProgramDateTimeMode {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "never" | "" => Ok(ProgramDateTimeMode::Never),
            "first" => Ok(ProgramDateTimeMode::FirstSegmentOnly),
            "all" => Ok(ProgramDateTimeMode::EverySegment),
            other => Err(SinkError::InvalidConfig(format!(
                "Unknown program date time mode '{}'",
                other
            ))),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub is_dev: bool,
    /// Directory holding segments and the manifest; served over HTTP
    pub output_dir: PathBuf,
    pub sink: SinkSettings,
}

impl Config {
    /// Load configuration from environment variables
    /// In DEV mode, provides sensible defaults. In PROD mode, PORT and
    /// HLS_OUTPUT_DIR are required.
    pub fn from_env() -> Result<Self> {
        let is_dev = env::var("DEV_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        let port = if is_dev {
            env_parse("PORT", 3000)?
        } else {
            env::var("PORT")
                .map_err(|_| SinkError::InvalidConfig("PORT is required in production".into()))?
                .parse()
                .map_err(|e| SinkError::InvalidConfig(format!("Invalid PORT: {}", e)))?
        };

        let output_dir = if is_dev {
            PathBuf::from(env::var("HLS_OUTPUT_DIR").unwrap_or_else(|_| ".".to_string()))
        } else {
            PathBuf::from(env::var("HLS_OUTPUT_DIR").map_err(|_| {
                SinkError::InvalidConfig("HLS_OUTPUT_DIR is required in production".into())
            })?)
        };

        let defaults = SinkSettings::default();

        let playlist_location = output_dir.join(
            env::var("HLS_PLAYLIST_LOCATION")
                .unwrap_or_else(|_| DEFAULT_PLAYLIST_LOCATION.to_string()),
        );

        let sink = SinkSettings {
            segment_location: env::var("HLS_SEGMENT_LOCATION")
                .unwrap_or(defaults.segment_location),
            playlist_location,
            playlist_root: env::var("HLS_PLAYLIST_ROOT").ok(),
            max_files: env_parse("HLS_MAX_FILES", defaults.max_files)?,
            playlist_length: env_parse("HLS_PLAYLIST_LENGTH", defaults.playlist_length)?,
            target_duration: Duration::from_secs(env_parse(
                "HLS_TARGET_DURATION",
                defaults.target_duration.as_secs(),
            )?),
            reset_on_stop: env_parse("HLS_RESET_ON_STOP", defaults.reset_on_stop)?,
            encryption: env_parse("HLS_ENCRYPTION", defaults.encryption)?,
            key_location: env::var("HLS_KEY_LOCATION")
                .map(PathBuf::from)
                .unwrap_or(defaults.key_location),
            key_uri: env::var("HLS_KEY_URI").unwrap_or(defaults.key_uri),
            program_date_time_mode: env_parse(
                "HLS_PROGRAM_DATE_TIME",
                defaults.program_date_time_mode,
            )?,
            program_date_time_shift: TimeDelta::milliseconds(env_parse(
                "HLS_PROGRAM_DATE_TIME_SHIFT_MS",
                0i64,
            )?),
            playlist_version: env_parse("HLS_PLAYLIST_VERSION", defaults.playlist_version)?,
            start_media_sequence: env_parse(
                "HLS_START_MEDIA_SEQUENCE",
                defaults.start_media_sequence,
            )?,
            start_discontinuity_sequence: env_parse(
                "HLS_START_DISCONTINUITY_SEQUENCE",
                defaults.start_discontinuity_sequence,
            )?,
        };

        sink.validate()?;

        Ok(Config {
            port,
            is_dev,
            output_dir,
            sink,
        })
    }
}

/// Parse an optional env var, falling back to `default` when unset.
fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| SinkError::InvalidConfig(format!("Invalid {}='{}': {}", name, raw, e))),
        Err(_) => Ok(default),
    }
}
