// Persisted configuration: tool locations, output settings and ffmpeg templates

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::engine::{EncoderSettings, TimeoutPolicy};

pub const CONFIG_FILE_NAME: &str = "trace2video.toml";

const APITRACE_NAME: &str = "apitrace";
const FFMPEG_NAME: &str = "ffmpeg";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "DEPENDENCIES", default)]
    pub dependencies: DependenciesConfig,

    #[serde(rename = "GENERAL", default)]
    pub general: GeneralConfig,

    #[serde(rename = "FFMPEG", default)]
    pub ffmpeg: FfmpegConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependenciesConfig {
    /// Directory containing the apitrace executable
    #[serde(default = "default_tool_dir")]
    pub apitrace_path: String,

    /// Directory containing the ffmpeg executable
    #[serde(default = "default_tool_dir")]
    pub ffmpeg_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Output directory, created if missing
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_scale")]
    pub scale: String,

    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Also write a compressed preview after the uncompressed encode
    #[serde(default = "default_true_config")]
    pub sample: bool,

    /// Seconds a single pass may run before it is stopped (0 = no limit)
    #[serde(default)]
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FfmpegConfig {
    /// Arguments for the uncompressed encode; `{file}` is the output path without extension
    #[serde(default = "default_raw_cmd")]
    pub raw_cmd: String,

    /// Arguments for the sample encode; `{file}` is the output path without extension
    #[serde(default = "default_sample_cmd")]
    pub sample_cmd: String,
}

fn default_tool_dir() -> String {
    "./".to_string()
}

fn default_output() -> String {
    "./output/".to_string()
}

fn default_scale() -> String {
    "1920x1080".to_string()
}

fn default_fps() -> u32 {
    60
}

fn default_true_config() -> bool {
    true
}

fn default_raw_cmd() -> String {
    r#"-vcodec libx264 -preset veryslow -qp 0 -y "{file}.mkv""#.to_string()
}

fn default_sample_cmd() -> String {
    r#"-vcodec mpeg4 -y "{file}.avi""#.to_string()
}

impl Default for DependenciesConfig {
    fn default() -> Self {
        Self {
            apitrace_path: default_tool_dir(),
            ffmpeg_path: default_tool_dir(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            scale: default_scale(),
            fps: default_fps(),
            sample: true,
            timeout: 0, // No limit; large traces can take hours
        }
    }
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            raw_cmd: default_raw_cmd(),
            sample_cmd: default_sample_cmd(),
        }
    }
}

/// Directory holding the running executable
pub fn tool_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Could not determine executable location")?;
    let exe = fs::canonicalize(&exe).unwrap_or(exe);
    exe.parent()
        .map(Path::to_path_buf)
        .context("Executable has no parent directory")
}

/// Resolve a configured path against `base` unless it is absolute.
///
/// `./` and `.\` prefixes are accepted whatever the host.
pub fn resolve_relative(path: &str, base: &Path) -> PathBuf {
    let trimmed = path
        .strip_prefix("./")
        .or_else(|| path.strip_prefix(".\\"))
        .unwrap_or(path);

    if trimmed.is_empty() {
        return base.to_path_buf();
    }

    let candidate = Path::new(trimmed);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}

fn executable_name(stem: &str) -> String {
    format!("{}{}", stem, std::env::consts::EXE_SUFFIX)
}

impl Config {
    /// Default config location: next to the executable
    pub fn config_path() -> Result<PathBuf> {
        Ok(tool_dir()?.join(CONFIG_FILE_NAME))
    }

    /// Load config from `path`, or create a default one there if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            debug!(path = %path.display(), "loaded config");
            Ok(config)
        } else {
            let config = Config::default();

            // A read-only install directory shouldn't stop the encode
            if let Err(e) = config.save_to(path) {
                warn!("Could not create default config file: {:#}", e);
                warn!("Using built-in defaults. Run 'trace2video init-config' to create one.");
            }

            Ok(config)
        }
    }

    /// Save config to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Create a default config file at `path` if there is none; returns whether one was written
    pub fn ensure_default(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        Config::default().save_to(path)?;
        Ok(true)
    }

    /// Resolve tool locations and templates against `base`
    pub fn encoder_settings(&self, base: &Path) -> EncoderSettings {
        EncoderSettings {
            dump_executable: resolve_relative(&self.dependencies.apitrace_path, base)
                .join(executable_name(APITRACE_NAME)),
            encode_executable: resolve_relative(&self.dependencies.ffmpeg_path, base)
                .join(executable_name(FFMPEG_NAME)),
            raw_args_template: self.ffmpeg.raw_cmd.clone(),
            sample_args_template: self.ffmpeg.sample_cmd.clone(),
        }
    }

    pub fn output_dir(&self, base: &Path) -> PathBuf {
        resolve_relative(&self.general.output, base)
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy::from_secs(self.general.timeout)
    }
}
