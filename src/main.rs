use anyhow::Result;
use clap::parser::ValueSource;
use clap::{value_parser, ArgMatches, CommandFactory, FromArgMatches, Parser};
use log::{info, warn};
use std::env;
use std::path::PathBuf;

use vidfit::config::{self, Settings};
use vidfit::encoder::FfmpegEncoder;
use vidfit::pipeline::Optimizer;
use vidfit::report::SessionReport;

#[derive(Parser, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, value_parser = value_parser!(PathBuf))]
    config_file: Option<PathBuf>,

    /// Target output size in MB (the number reported in the summary)
    #[arg(long, default_value_t = 9.8, id = "target_size")]
    target_size: f64,

    /// Absolute size ceiling in MB; must be at least the target
    #[arg(long, default_value_t = 10.0, id = "ceiling")]
    ceiling: f64,

    /// Maximum encode attempts per tier
    #[arg(long, default_value_t = 5, id = "max_retries")]
    max_retries: u32,

    /// x264 preset (speed/quality knob)
    #[arg(long, default_value = "medium", id = "preset")]
    preset: String,

    /// Directory for optimized output files
    #[arg(long, default_value = "optimized", id = "output_dir")]
    output_dir: PathBuf,

    /// Keep two-pass logs and intermediate segments for diagnosis
    #[arg(long, default_value_t = false, id = "keep_temp")]
    keep_temp: bool,

    /// Apply loudness normalization to re-encoded audio. Pass
    /// --normalize-audio=false to override config.
    #[arg(
        long = "normalize-audio",
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = clap::builder::BoolishValueParser::new(),
        id = "normalize_audio"
    )]
    normalize_audio: Option<bool>,

    /// Path to the ffmpeg binary (defaults to PATH lookup)
    #[arg(long, id = "ffmpeg_path")]
    ffmpeg_path: Option<PathBuf>,

    /// Path to the ffprobe binary (defaults to PATH lookup)
    #[arg(long, id = "ffprobe_path")]
    ffprobe_path: Option<PathBuf>,

    /// Video files to fit under the target size
    #[arg(required = true, num_args = 1..)]
    input_files: Vec<PathBuf>,
}

fn cli_value_provided(matches: &ArgMatches, id: &str) -> bool {
    matches
        .value_source(id)
        .is_some_and(|src| matches!(src, ValueSource::CommandLine))
}

fn apply_config_overrides(args: &mut Args, cfg: &config::Config, matches: &ArgMatches) {
    if !cli_value_provided(matches, "target_size") {
        if let Some(target) = cfg.target_size_mb {
            args.target_size = target;
        }
    }
    if !cli_value_provided(matches, "ceiling") {
        if let Some(ceiling) = cfg.ceiling_mb {
            args.ceiling = ceiling;
        }
    }
    if !cli_value_provided(matches, "max_retries") {
        if let Some(retries) = cfg.max_retries {
            args.max_retries = retries;
        }
    }
    if !cli_value_provided(matches, "preset") {
        if let Some(preset) = cfg.preset.as_ref() {
            args.preset = preset.clone();
        }
    }
    if !cli_value_provided(matches, "output_dir") {
        if let Some(dir) = cfg.output_dir.as_ref() {
            args.output_dir = dir.clone();
        }
    }
    if !cli_value_provided(matches, "keep_temp") {
        if let Some(keep) = cfg.keep_temp {
            args.keep_temp = keep;
        }
    }
    if args.normalize_audio.is_none() {
        if let Some(normalize) = cfg.normalize_audio {
            args.normalize_audio = Some(normalize);
        }
    }
    if args.ffmpeg_path.is_none() {
        args.ffmpeg_path = cfg.ffmpeg_path.clone();
    }
    if args.ffprobe_path.is_none() {
        args.ffprobe_path = cfg.ffprobe_path.clone();
    }
}

fn build_settings(args: &Args, cfg: Option<&config::Config>) -> Settings {
    let mut settings = Settings {
        target_size_mb: args.target_size,
        ceiling_mb: args.ceiling,
        max_retries: args.max_retries,
        preset: args.preset.clone(),
        output_dir: args.output_dir.clone(),
        keep_temp: args.keep_temp,
        normalize_audio: args.normalize_audio.unwrap_or(true),
        ..Settings::default()
    };

    // Knobs without a CLI surface come straight from the config file.
    if let Some(cfg) = cfg {
        if let Some(value) = cfg.video_floor_kbps {
            settings.video_floor_kbps = value;
        }
        if let Some(value) = cfg.audio_floor_kbps {
            settings.audio_floor_kbps = value;
        }
        if let Some(value) = cfg.audio_initial_kbps {
            settings.audio_initial_kbps = value;
        }
        if let Some(value) = cfg.audio_step_kbps {
            settings.audio_step_kbps = value;
        }
        if let Some(value) = cfg.overhead_kb {
            settings.overhead_kb = value;
        }
        if let Some(value) = cfg.primary_max_width {
            settings.primary_max_width = value;
        }
        if let Some(value) = cfg.rescue_max_width {
            settings.rescue_max_width = value;
        }
        if let Some(value) = cfg.rescue_damping {
            settings.rescue_damping = value;
        }
        if let Some(value) = cfg.last_resort_crf {
            settings.last_resort_crf = value;
        }
        if let Some(value) = cfg.min_split_secs {
            settings.min_split_secs = value;
        }
        if let Some(value) = cfg.keyframe_min_secs {
            settings.keyframe_min_secs = value;
        }
    }

    settings
}

fn main() -> Result<()> {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", "info");
    }
    let _ = env_logger::Builder::from_default_env()
        .format_timestamp(None)
        .target(env_logger::Target::Stderr)
        .try_init();

    let mut matches = Args::command().get_matches();
    let mut args = Args::from_arg_matches_mut(&mut matches).expect("Failed to parse CLI arguments");

    let loaded_config = config::load(args.config_file.as_deref())?;
    if let Some((_, source)) = &loaded_config {
        match source {
            config::ConfigSource::Cli(path) => {
                info!("Loaded configuration from '{}'.", path.display());
            }
            config::ConfigSource::Env(path) => {
                info!(
                    "Loaded configuration from '{}' (via {}).",
                    path.display(),
                    config::CONFIG_ENV_VAR
                );
            }
            config::ConfigSource::Default(path) => {
                info!("Loaded configuration from '{}'.", path.display());
            }
        }
    }
    if let Some((cfg, _)) = &loaded_config {
        apply_config_overrides(&mut args, cfg, &matches);
    }

    let settings = build_settings(&args, loaded_config.as_ref().map(|(cfg, _)| cfg));
    settings.validate()?;

    let encoder = FfmpegEncoder::new(
        args.ffmpeg_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("ffmpeg")),
        args.ffprobe_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("ffprobe")),
    );
    encoder.ensure_available()?;

    let work_dir = settings.output_dir.join(".vidfit-work");
    let mut report = SessionReport::new();
    let mut optimizer = Optimizer::new(&encoder, &settings, work_dir);

    for input in &args.input_files {
        if let Err(err) = optimizer.process(input, &mut report) {
            // Setup failures for one file never abort the batch.
            warn!("Skipping '{}': {:#}", input.display(), err);
        }
    }

    print!("{}", report.render());

    if report.any_failures() {
        std::process::exit(1);
    }
    Ok(())
}
