use anyhow::{Context, Result};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use crate::config::Settings;
use crate::encoder::Encoder;
use crate::model;
use crate::rate::{AttemptContext, RateState, Tier, TierOutcome, TierParams};
use crate::report::{SessionRecord, SessionReport, StatusKind};
use crate::rescue::{self, RescueOutcome};
use crate::split;

/// Drives one input (and its recursive segment tree) through the full
/// waterfall: copy short-circuit, size-model bitrate, primary retries,
/// rescue tiers, then keyframe-aligned splitting. Owns the temp-file
/// namespace for the file it is processing; the report is shared,
/// append-only state owned by the caller.
pub struct Optimizer<'a> {
    encoder: &'a dyn Encoder,
    settings: &'a Settings,
    work_dir: PathBuf,
    file_index: usize,
}

impl<'a> Optimizer<'a> {
    pub fn new(encoder: &'a dyn Encoder, settings: &'a Settings, work_dir: PathBuf) -> Self {
        Self {
            encoder,
            settings,
            work_dir,
            file_index: 0,
        }
    }

    /// Process one top-level input to completion. Failures are recorded in
    /// the report, never propagated; only setup problems (unwritable
    /// output area) are errors.
    pub fn process(&mut self, input: &Path, report: &mut SessionReport) -> Result<()> {
        self.file_index += 1;
        fs::create_dir_all(&self.settings.output_dir).with_context(|| {
            format!(
                "Failed to create output directory '{}'",
                self.settings.output_dir.display()
            )
        })?;
        fs::create_dir_all(&self.work_dir).with_context(|| {
            format!(
                "Failed to create working directory '{}'",
                self.work_dir.display()
            )
        })?;

        let label = input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| input.display().to_string());
        let output = self.settings.output_dir.join(output_name(input));

        info!("Processing '{}' -> '{}'", input.display(), output.display());
        self.optimize_file(input, &output, &label, report);

        if !self.settings.keep_temp {
            if let Err(err) = fs::remove_dir_all(&self.work_dir) {
                warn!(
                    "Failed to clean working directory '{}': {}",
                    self.work_dir.display(),
                    err
                );
            }
        }
        Ok(())
    }

    /// The recursive Optimize entry point. Appends exactly one record for
    /// this input (plus whatever its children append) and returns the
    /// final size on success.
    fn optimize_file(
        &mut self,
        input: &Path,
        output: &Path,
        label: &str,
        report: &mut SessionReport,
    ) -> Option<u64> {
        let original = self.encoder.file_size(input);
        if original == 0 {
            warn!("'{}' is missing or empty", input.display());
            self.record(report, label, original, None, StatusKind::Unreadable);
            return None;
        }

        // Copy short-circuit: nothing to do if it already fits.
        if original <= self.settings.ceiling_bytes() {
            info!(
                "'{}' is already under the ceiling at {:.2} MB; copying",
                input.display(),
                model::bytes_to_mb(original)
            );
            if let Err(err) = fs::copy(input, output) {
                warn!("Copy of '{}' failed: {}", input.display(), err);
                self.record(report, label, original, None, StatusKind::CopyFailed);
                return None;
            }
            self.record(report, label, original, Some(original), StatusKind::Copied);
            return Some(original);
        }

        let duration = match self.encoder.probe_duration(input) {
            Ok(duration) => duration,
            Err(err) => {
                warn!("Probe of '{}' failed: {}", input.display(), err);
                self.record(report, label, original, None, StatusKind::Unreadable);
                return None;
            }
        };

        let pass_log = self.temp_path(&format!("{}.2pass", label));
        let ctx = AttemptContext {
            encoder: self.encoder,
            input,
            output,
            pass_log: &pass_log,
            preset: &self.settings.preset,
            normalize_audio: self.settings.normalize_audio,
            target_mb: self.settings.target_size_mb,
            ceiling_bytes: self.settings.ceiling_bytes(),
        };

        let mut state = RateState {
            video_kbps: self.settings.video_floor_kbps,
            audio_kbps: self.settings.audio_initial_kbps,
            max_width: self.settings.primary_max_width,
            attempts: 0,
            tier: Tier::Primary,
        };

        // Pre-flight: when floor bitrates cannot fit the full duration no
        // amount of rescue will help, so split immediately.
        if split::preflight_requires_split(self.settings, duration) {
            info!(
                "'{}' is mathematically unreachable at floor bitrates for {:.1}s",
                input.display(),
                duration
            );
            if split::splittable(self.settings, duration) {
                return self.do_split(input, output, label, original, duration, report);
            }
            // Too short to split meaningfully: rescue is the only option
            // left even though the math is against it.
            let outcome = rescue::run_rescue(&ctx, &mut state, self.settings, duration);
            return self.finish_rescue(outcome, input, output, label, original, duration, report);
        }

        let derived = model::derive_video_bitrate(
            self.settings.target_bytes(),
            duration,
            self.settings.audio_initial_kbps,
            self.settings.overhead_bytes(),
            self.settings.video_floor_kbps,
        );
        if derived.clamped_to_floor {
            warn!(
                "Initial bitrate for '{}' clamped to the {} kbps floor; target may be unreachable",
                input.display(),
                self.settings.video_floor_kbps
            );
        }
        state.video_kbps = derived.kbps;

        let primary = TierParams {
            tier: Tier::Primary,
            retry_ceiling: self.settings.max_retries,
            video_floor_kbps: self.settings.video_floor_kbps,
            audio_floor_kbps: self.settings.audio_floor_kbps,
            audio_step_kbps: self.settings.audio_step_kbps,
            damping: 1.0,
            allow_audio_stepdown: true,
            max_width: self.settings.primary_max_width,
        };

        match crate::rate::run_tier(&ctx, &mut state, &primary) {
            TierOutcome::Fit { size_bytes } => {
                self.record(report, label, original, Some(size_bytes), StatusKind::Optimized);
                Some(size_bytes)
            }
            TierOutcome::EncodeFailed { detail } => {
                warn!("'{}': {}", input.display(), detail);
                self.discard(output);
                self.record(report, label, original, None, StatusKind::EncodeFailed);
                None
            }
            TierOutcome::FloorReached | TierOutcome::Exhausted => {
                let outcome = rescue::run_rescue(&ctx, &mut state, self.settings, duration);
                self.finish_rescue(outcome, input, output, label, original, duration, report)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_rescue(
        &mut self,
        outcome: RescueOutcome,
        input: &Path,
        output: &Path,
        label: &str,
        original: u64,
        duration: f64,
        report: &mut SessionReport,
    ) -> Option<u64> {
        match outcome {
            RescueOutcome::Fit { tier, size_bytes } => {
                let status = match tier {
                    Tier::RescuePrimary => StatusKind::RescuedPrimary,
                    Tier::RescueDownscale => StatusKind::RescuedDownscaled,
                    _ => StatusKind::RescuedLastResort,
                };
                self.record(report, label, original, Some(size_bytes), status);
                Some(size_bytes)
            }
            RescueOutcome::EncodeFailed { detail } => {
                warn!("'{}': {}", input.display(), detail);
                self.discard(output);
                self.record(report, label, original, None, StatusKind::EncodeFailed);
                None
            }
            RescueOutcome::Exhausted => {
                self.discard(output);
                if split::splittable(self.settings, duration) {
                    self.do_split(input, output, label, original, duration, report)
                } else {
                    self.record(report, label, original, None, StatusKind::TooLarge);
                    None
                }
            }
        }
    }

    /// Cut at a keyframe-aligned midpoint and recurse the whole pipeline
    /// on each half. Each segment re-enters every tier: a shorter segment
    /// may converge where the whole file could not.
    #[allow(clippy::too_many_arguments)]
    fn do_split(
        &mut self,
        input: &Path,
        output: &Path,
        label: &str,
        original: u64,
        duration: f64,
        report: &mut SessionReport,
    ) -> Option<u64> {
        let cut = split::choose_cut_point(
            self.encoder,
            input,
            duration,
            self.settings.keyframe_min_secs,
        );

        let extension = input
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mp4".to_string());
        let part1 = self.temp_path(&format!("{}.part1.{}", label, extension));
        let part2 = self.temp_path(&format!("{}.part2.{}", label, extension));

        let plan = match split::cut_segments(self.encoder, input, cut, part1, part2) {
            Ok(plan) => plan,
            Err(err) => {
                warn!("Split of '{}' failed: {}", input.display(), err);
                self.record(report, label, original, None, StatusKind::SplitFailed);
                return None;
            }
        };

        let label1 = format!("{}.part1", label);
        let label2 = format!("{}.part2", label);
        let child_out1 = self.temp_path(&format!("{}.fit.mp4", label1));
        let child_out2 = self.temp_path(&format!("{}.fit.mp4", label2));

        // Both children always run: a failed sibling does not cancel the
        // other, whose own record stands regardless of the parent.
        let first = self.optimize_file(&plan.part1, &child_out1, &label1, report);
        let second = self.optimize_file(&plan.part2, &child_out2, &label2, report);

        match (first, second) {
            (Some(_), Some(_)) => {
                if let Err(err) = self
                    .encoder
                    .concat(&[child_out1.clone(), child_out2.clone()], output)
                {
                    warn!("Recombining '{}' failed: {}", label, err);
                    self.record(report, label, original, None, StatusKind::SplitFailed);
                    return None;
                }
                let final_bytes = self.encoder.file_size(output);
                self.record(report, label, original, Some(final_bytes), StatusKind::Split);
                Some(final_bytes)
            }
            _ => {
                self.record(report, label, original, None, StatusKind::SplitFailed);
                None
            }
        }
    }

    fn record(
        &self,
        report: &mut SessionReport,
        label: &str,
        original: u64,
        final_bytes: Option<u64>,
        status: StatusKind,
    ) {
        info!("'{}' finished: {}", label, status);
        report.append(SessionRecord {
            name: label.to_string(),
            original_bytes: original,
            final_bytes,
            status,
        });
    }

    /// Per-job temp names carry the process id and file index so parallel
    /// batch runs never collide in a shared temp area.
    fn temp_path(&self, stem: &str) -> PathBuf {
        self.work_dir
            .join(format!("vidfit-{}-{}-{}", process::id(), self.file_index, stem))
    }

    fn discard(&self, path: &Path) {
        if let Err(err) = fs::remove_file(path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove '{}': {}", path.display(), err);
            }
        }
    }
}

/// Output name derived from the input, status-free: `clip.mkv` becomes
/// `clip.fit.mp4`.
pub fn output_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    format!("{}.fit.mp4", stem)
}
