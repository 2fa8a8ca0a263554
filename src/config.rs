use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV_VAR: &str = "VIDFIT_CONFIG";

/// Optional overrides loaded from a TOML file. Anything absent falls back
/// to the CLI value or the built-in default.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub target_size_mb: Option<f64>,
    pub ceiling_mb: Option<f64>,
    pub video_floor_kbps: Option<u32>,
    pub audio_floor_kbps: Option<u32>,
    pub audio_initial_kbps: Option<u32>,
    pub audio_step_kbps: Option<u32>,
    pub max_retries: Option<u32>,
    pub overhead_kb: Option<u32>,
    pub primary_max_width: Option<u32>,
    pub rescue_max_width: Option<u32>,
    pub rescue_damping: Option<f64>,
    pub last_resort_crf: Option<u8>,
    pub min_split_secs: Option<f64>,
    pub keyframe_min_secs: Option<f64>,
    pub preset: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub normalize_audio: Option<bool>,
    pub keep_temp: Option<bool>,
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum ConfigSource {
    Cli(PathBuf),
    Env(PathBuf),
    Default(PathBuf),
}

pub fn load(path_override: Option<&Path>) -> Result<Option<(Config, ConfigSource)>> {
    let mut candidates: Vec<(PathBuf, fn(PathBuf) -> ConfigSource)> = Vec::new();

    if let Some(path) = path_override {
        if !path.exists() {
            bail!("Configuration file '{}' does not exist", path.display());
        }
        candidates.push((path.to_path_buf(), ConfigSource::Cli));
    } else {
        if let Some(env_path) = env::var_os(CONFIG_ENV_VAR).filter(|value| !value.is_empty()) {
            candidates.push((PathBuf::from(env_path), ConfigSource::Env));
        }
        for path in default_config_candidates() {
            candidates.push((path, ConfigSource::Default));
        }
    }

    for (candidate, source) in candidates {
        if candidate.as_os_str().is_empty() || !candidate.exists() {
            continue;
        }

        let contents = fs::read_to_string(&candidate).with_context(|| {
            format!(
                "Failed to read configuration file at {}",
                candidate.display()
            )
        })?;

        let config: Config = toml::from_str(&contents).with_context(|| {
            format!("Failed to parse configuration file {}", candidate.display())
        })?;

        return Ok(Some((config, source(candidate))));
    }

    Ok(None)
}

fn default_config_candidates() -> Vec<PathBuf> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();

    let mut push_unique = |path: PathBuf, out: &mut Vec<PathBuf>| {
        if !path.as_os_str().is_empty() && seen.insert(path.clone()) {
            out.push(path);
        }
    };

    if let Some(xdg_config) = env::var_os("XDG_CONFIG_HOME").filter(|val| !val.is_empty()) {
        let mut path = PathBuf::from(xdg_config);
        path.push("vidfit");
        path.push("config.toml");
        push_unique(path, &mut out);
    }

    if let Some(home) = env::var_os("HOME").filter(|val| !val.is_empty()) {
        let home = PathBuf::from(home);
        let mut path = home.join(".config");
        path.push("vidfit");
        path.push("config.toml");
        push_unique(path, &mut out);
        push_unique(home.join("vidfit.toml"), &mut out);
    }

    if let Ok(current_dir) = env::current_dir() {
        push_unique(current_dir.join("vidfit.toml"), &mut out);
    }

    if let Ok(exe_path) = env::current_exe() {
        if let Some(parent) = exe_path.parent() {
            push_unique(parent.join("vidfit.toml"), &mut out);
        }
    }

    push_unique(PathBuf::from("/etc/vidfit/config.toml"), &mut out);

    out
}

/// Fully-resolved knobs consumed by the pipeline. Built once in `main`
/// after CLI/config/default precedence is applied.
#[derive(Debug, Clone)]
pub struct Settings {
    pub target_size_mb: f64,
    pub ceiling_mb: f64,
    pub video_floor_kbps: u32,
    pub audio_floor_kbps: u32,
    pub audio_initial_kbps: u32,
    pub audio_step_kbps: u32,
    pub max_retries: u32,
    pub overhead_kb: u32,
    pub primary_max_width: u32,
    pub rescue_max_width: u32,
    pub rescue_damping: f64,
    pub last_resort_crf: u8,
    pub min_split_secs: f64,
    pub keyframe_min_secs: f64,
    pub preset: String,
    pub output_dir: PathBuf,
    pub normalize_audio: bool,
    pub keep_temp: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_size_mb: 9.8,
            ceiling_mb: 10.0,
            video_floor_kbps: 500,
            audio_floor_kbps: 64,
            audio_initial_kbps: 192,
            audio_step_kbps: 32,
            max_retries: 5,
            overhead_kb: 200,
            primary_max_width: 1920,
            rescue_max_width: 1280,
            rescue_damping: 0.9,
            last_resort_crf: 30,
            min_split_secs: 25.0,
            keyframe_min_secs: 0.5,
            preset: "medium".to_string(),
            output_dir: PathBuf::from("optimized"),
            normalize_audio: true,
            keep_temp: false,
        }
    }
}

impl Settings {
    pub fn target_bytes(&self) -> u64 {
        crate::model::mb_to_bytes(self.target_size_mb)
    }

    pub fn ceiling_bytes(&self) -> u64 {
        crate::model::mb_to_bytes(self.ceiling_mb)
    }

    pub fn overhead_bytes(&self) -> u64 {
        self.overhead_kb as u64 * 1024
    }

    /// Numeric relationships the rest of the pipeline assumes.
    pub fn validate(&self) -> Result<()> {
        if self.ceiling_mb < self.target_size_mb {
            bail!(
                "ceiling ({} MB) must be at least the target size ({} MB)",
                self.ceiling_mb,
                self.target_size_mb
            );
        }
        if self.target_size_mb <= 0.0 {
            bail!("target size must be positive");
        }
        if self.audio_initial_kbps < self.audio_floor_kbps {
            bail!(
                "initial audio bitrate ({} kbps) is below the audio floor ({} kbps)",
                self.audio_initial_kbps,
                self.audio_floor_kbps
            );
        }
        if self.rescue_damping <= 0.0 || self.rescue_damping > 1.0 {
            bail!("rescue damping must be in (0, 1]");
        }
        if self.max_retries == 0 {
            bail!("max retries must be at least 1");
        }
        Ok(())
    }
}
