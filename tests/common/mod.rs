#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use vidfit::config::Settings;
use vidfit::encoder::{EncodeJob, EncodeOutcome, Encoder};

/// What the next non-analysis encode call should do.
pub enum ScriptedEncode {
    /// Write a file of this many bytes and report success.
    Produce(u64),
    /// Report a failed encoder process.
    Fail(&'static str),
}

/// Scripted stand-in for the ffmpeg adapter. Encode results come from a
/// queue; produced files are written with real bytes so the pipeline
/// measures genuine sizes. Pass-1 analysis calls always succeed and do not
/// consume the script.
#[derive(Default)]
pub struct MockEncoder {
    pub durations: RefCell<HashMap<PathBuf, f64>>,
    pub script: RefCell<VecDeque<ScriptedEncode>>,
    /// Every pass-2 or single-pass job issued, in order.
    pub encode_log: RefCell<Vec<EncodeJob>>,
    pub keyframe: Option<f64>,
    pub keyframe_queries: RefCell<Vec<f64>>,
    pub cut_points: RefCell<Vec<f64>>,
    /// Sizes written for part 1 and part 2 of a cut.
    pub cut_sizes: (u64, u64),
    pub fail_cut: bool,
}

impl MockEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_duration(&self, path: &Path, secs: f64) {
        self.durations.borrow_mut().insert(path.to_path_buf(), secs);
    }

    pub fn push(&self, step: ScriptedEncode) {
        self.script.borrow_mut().push_back(step);
    }

    pub fn encode_calls(&self) -> usize {
        self.encode_log.borrow().len()
    }
}

impl Encoder for MockEncoder {
    fn probe_duration(&self, path: &Path) -> Result<f64> {
        self.durations
            .borrow()
            .get(path)
            .copied()
            .ok_or_else(|| anyhow!("no duration registered for '{}'", path.display()))
    }

    fn encode(&self, job: &EncodeJob) -> EncodeOutcome {
        if job.pass == Some(1) {
            return EncodeOutcome {
                success: true,
                size_bytes: 0,
                detail: None,
            };
        }
        self.encode_log.borrow_mut().push(job.clone());

        let step = self
            .script
            .borrow_mut()
            .pop_front()
            .expect("encode called with an empty script");
        match step {
            ScriptedEncode::Produce(bytes) => {
                fs::write(&job.output, vec![0u8; bytes as usize]).expect("write mock output");
                EncodeOutcome {
                    success: true,
                    size_bytes: bytes,
                    detail: None,
                }
            }
            ScriptedEncode::Fail(detail) => EncodeOutcome {
                success: false,
                size_bytes: 0,
                detail: Some(detail.to_string()),
            },
        }
    }

    fn nearest_keyframe_before(&self, _path: &Path, time_secs: f64) -> Option<f64> {
        self.keyframe_queries.borrow_mut().push(time_secs);
        self.keyframe
    }

    fn cut(&self, input: &Path, cut_secs: f64, part1: &Path, part2: &Path) -> Result<()> {
        self.cut_points.borrow_mut().push(cut_secs);
        if self.fail_cut {
            bail!("scripted cut failure");
        }
        fs::write(part1, vec![0u8; self.cut_sizes.0 as usize])?;
        fs::write(part2, vec![0u8; self.cut_sizes.1 as usize])?;

        // Children inherit proportional durations from the parent.
        let parent = self.durations.borrow().get(input).copied();
        if let Some(duration) = parent {
            let mut durations = self.durations.borrow_mut();
            durations.insert(part1.to_path_buf(), cut_secs);
            durations.insert(part2.to_path_buf(), duration - cut_secs);
        }
        Ok(())
    }

    fn concat(&self, parts: &[PathBuf], output: &Path) -> Result<()> {
        let mut combined = Vec::new();
        for part in parts {
            combined.extend(fs::read(part)?);
        }
        fs::write(output, combined)?;
        Ok(())
    }
}

pub fn write_input(dir: &Path, name: &str, bytes: u64) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, vec![0u8; bytes as usize]).expect("write test input");
    path
}

pub const MB: u64 = 1024 * 1024;

/// Settings scaled down so tests can work with small files: 1.0 MB
/// ceiling, 0.9 MB target, floors low enough that a 60s clip passes the
/// split pre-flight.
pub fn small_settings(output_dir: &Path) -> Settings {
    Settings {
        target_size_mb: 0.9,
        ceiling_mb: 1.0,
        video_floor_kbps: 10,
        audio_floor_kbps: 8,
        audio_initial_kbps: 16,
        audio_step_kbps: 4,
        max_retries: 2,
        output_dir: output_dir.to_path_buf(),
        ..Settings::default()
    }
}
