use anyhow::{bail, Context, Result};
use log::{debug, trace, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Rate-control mode for one encode attempt. Bitrate targeting and
/// constant-quality are mutually exclusive by construction.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum VideoSpec {
    Bitrate { kbps: u32 },
    Quality { crf: u8 },
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AudioSpec {
    pub kbps: u32,
    /// Apply a loudness normalization filter while re-encoding.
    pub normalize: bool,
}

/// Immutable request for a single encoder invocation. Constructed fresh per
/// attempt; never mutated.
#[derive(Clone, Debug)]
pub struct EncodeJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub video: VideoSpec,
    pub audio: AudioSpec,
    /// Aspect-preserving width cap; height is derived to stay even.
    pub max_width: u32,
    /// 1 or 2 for two-pass bitrate mode; None for single-pass.
    pub pass: Option<u8>,
    /// Statistics log shared between the two passes.
    pub pass_log: Option<PathBuf>,
    pub preset: String,
}

/// Result of one [`EncodeJob`]. A failed process spawn is reported here as
/// well: tiers decide on outcomes, never on propagated error objects.
#[derive(Clone, Debug)]
pub struct EncodeOutcome {
    pub success: bool,
    pub size_bytes: u64,
    pub detail: Option<String>,
}

impl EncodeOutcome {
    fn failed(detail: String) -> Self {
        Self {
            success: false,
            size_bytes: 0,
            detail: Some(detail),
        }
    }
}

/// The external encoder capability. The rate-control core only ever talks
/// to this trait; the ffmpeg adapter below is the production implementation
/// and tests substitute a scripted one.
pub trait Encoder {
    /// Duration in seconds; fails for unreadable inputs.
    fn probe_duration(&self, path: &Path) -> Result<f64>;

    fn encode(&self, job: &EncodeJob) -> EncodeOutcome;

    /// Zero for missing or empty files, never an error.
    fn file_size(&self, path: &Path) -> u64 {
        fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }

    /// Timestamp of the nearest keyframe at or before `time_secs`.
    fn nearest_keyframe_before(&self, path: &Path, time_secs: f64) -> Option<f64>;

    /// Lossless cut into [0, cut) and [cut, end); no re-encode.
    fn cut(&self, input: &Path, cut_secs: f64, part1: &Path, part2: &Path) -> Result<()>;

    /// Stream-copy concatenation of already-encoded parts.
    fn concat(&self, parts: &[PathBuf], output: &Path) -> Result<()>;
}

/// Adapter driving the ffmpeg/ffprobe binaries as blocking subprocesses.
pub struct FfmpegEncoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

#[cfg(windows)]
const NULL_SINK: &str = "NUL";
#[cfg(not(windows))]
const NULL_SINK: &str = "/dev/null";

impl FfmpegEncoder {
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf) -> Self {
        Self { ffmpeg, ffprobe }
    }

    /// Fail fast if the binaries are missing rather than on the first file.
    pub fn ensure_available(&self) -> Result<()> {
        for binary in [&self.ffmpeg, &self.ffprobe] {
            let out = Command::new(binary).arg("-version").output();
            match out {
                Ok(o) if o.status.success() => {}
                _ => bail!(
                    "'{}' not found or not runnable; install ffmpeg and ensure it is on PATH",
                    binary.display()
                ),
            }
        }
        Ok(())
    }

    fn video_args(job: &EncodeJob) -> Vec<String> {
        let mut args = vec![
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            job.preset.clone(),
            "-vf".to_string(),
            format!("scale='min({},iw)':-2", job.max_width),
        ];
        match job.video {
            VideoSpec::Bitrate { kbps } => {
                args.extend([
                    "-b:v".to_string(),
                    format!("{}k", kbps),
                    "-maxrate".to_string(),
                    format!("{}k", kbps),
                    "-bufsize".to_string(),
                    format!("{}k", kbps * 2),
                ]);
            }
            VideoSpec::Quality { crf } => {
                args.extend(["-crf".to_string(), crf.to_string()]);
            }
        }
        args
    }
}

impl Encoder for FfmpegEncoder {
    fn probe_duration(&self, path: &Path) -> Result<f64> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .with_context(|| format!("Failed to run '{}'", self.ffprobe.display()))?;

        if !output.status.success() {
            bail!(
                "ffprobe failed for '{}': {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let duration: f64 = stdout
            .trim()
            .parse()
            .with_context(|| format!("'{}' has no parsable duration", path.display()))?;
        if duration <= 0.0 {
            bail!("'{}' reports a non-positive duration", path.display());
        }
        Ok(duration)
    }

    fn encode(&self, job: &EncodeJob) -> EncodeOutcome {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-y", "-v", "error", "-i"]).arg(&job.input);
        for arg in Self::video_args(job) {
            cmd.arg(arg);
        }

        match job.pass {
            Some(pass_number) => {
                cmd.args(["-pass".to_string(), pass_number.to_string()]);
                if let Some(log) = &job.pass_log {
                    cmd.arg("-passlogfile").arg(log);
                }
                if pass_number == 1 {
                    // Analysis pass: video only, output discarded.
                    cmd.args(["-an", "-f", "mp4", NULL_SINK]);
                } else {
                    cmd.args(["-c:a", "aac", "-b:a", &format!("{}k", job.audio.kbps)]);
                    if job.audio.normalize {
                        cmd.args(["-af", "loudnorm"]);
                    }
                    cmd.args(["-movflags", "+faststart"]).arg(&job.output);
                }
            }
            None => {
                cmd.args(["-c:a", "aac", "-b:a", &format!("{}k", job.audio.kbps)]);
                if job.audio.normalize {
                    cmd.args(["-af", "loudnorm"]);
                }
                cmd.args(["-movflags", "+faststart"]).arg(&job.output);
            }
        }

        trace!("Running encode: {:?}", cmd);
        let output = match cmd.output() {
            Ok(output) => output,
            Err(err) => {
                return EncodeOutcome::failed(format!(
                    "failed to spawn '{}': {}",
                    self.ffmpeg.display(),
                    err
                ));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return EncodeOutcome::failed(format!(
                "ffmpeg exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            ));
        }

        let size_bytes = if job.pass == Some(1) {
            0
        } else {
            self.file_size(&job.output)
        };
        EncodeOutcome {
            success: true,
            size_bytes,
            detail: None,
        }
    }

    fn nearest_keyframe_before(&self, path: &Path, time_secs: f64) -> Option<f64> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "packet=pts_time,flags",
                "-of",
                "csv=p=0",
                "-read_intervals",
                &format!("0%{:.3}", time_secs),
            ])
            .arg(path)
            .output()
            .ok()?;

        if !output.status.success() {
            warn!(
                "Keyframe probe failed for '{}': {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return None;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut best: Option<f64> = None;
        for line in stdout.lines() {
            let mut fields = line.trim().split(',');
            let pts: f64 = match fields.next().and_then(|v| v.parse().ok()) {
                Some(pts) => pts,
                None => continue,
            };
            let flags = fields.next().unwrap_or("");
            if flags.contains('K') && pts <= time_secs && best.map_or(true, |b| pts > b) {
                best = Some(pts);
            }
        }
        best
    }

    fn cut(&self, input: &Path, cut_secs: f64, part1: &Path, part2: &Path) -> Result<()> {
        let cut = format!("{:.3}", cut_secs);
        let first = Command::new(&self.ffmpeg)
            .args(["-y", "-v", "error", "-i"])
            .arg(input)
            .args(["-t", &cut, "-c", "copy"])
            .arg(part1)
            .output()
            .with_context(|| format!("Failed to run '{}'", self.ffmpeg.display()))?;
        if !first.status.success() {
            bail!(
                "lossless cut of '{}' part 1 failed: {}",
                input.display(),
                String::from_utf8_lossy(&first.stderr).trim()
            );
        }

        let second = Command::new(&self.ffmpeg)
            .args(["-y", "-v", "error", "-ss", &cut, "-i"])
            .arg(input)
            .args(["-c", "copy"])
            .arg(part2)
            .output()
            .with_context(|| format!("Failed to run '{}'", self.ffmpeg.display()))?;
        if !second.status.success() {
            bail!(
                "lossless cut of '{}' part 2 failed: {}",
                input.display(),
                String::from_utf8_lossy(&second.stderr).trim()
            );
        }

        debug!(
            "Cut '{}' at {:.3}s into '{}' and '{}'",
            input.display(),
            cut_secs,
            part1.display(),
            part2.display()
        );
        Ok(())
    }

    fn concat(&self, parts: &[PathBuf], output: &Path) -> Result<()> {
        let list_path = output.with_extension("concat.txt");
        let mut list = String::new();
        for part in parts {
            // The concat demuxer requires quoted paths with escaped quotes.
            let escaped = part.to_string_lossy().replace('\'', "'\\''");
            list.push_str(&format!("file '{}'\n", escaped));
        }
        fs::write(&list_path, list)
            .with_context(|| format!("Failed to write concat list '{}'", list_path.display()))?;

        let result = Command::new(&self.ffmpeg)
            .args(["-y", "-v", "error", "-f", "concat", "-safe", "0", "-i"])
            .arg(&list_path)
            .args(["-c", "copy"])
            .arg(output)
            .output()
            .with_context(|| format!("Failed to run '{}'", self.ffmpeg.display()));

        if let Err(err) = fs::remove_file(&list_path) {
            warn!(
                "Failed to remove concat list '{}': {}",
                list_path.display(),
                err
            );
        }

        let result = result?;
        if !result.status.success() {
            bail!(
                "concat into '{}' failed: {}",
                output.display(),
                String::from_utf8_lossy(&result.stderr).trim()
            );
        }
        Ok(())
    }
}
