use log::{debug, info, warn};
use std::path::Path;

use crate::encoder::{AudioSpec, EncodeJob, EncodeOutcome, Encoder, VideoSpec};
use crate::model;

/// Strategy level currently driving the encode parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Tier {
    Primary,
    RescuePrimary,
    RescueDownscale,
    LastResort,
}

/// Mutable working state threaded through the retry tiers for one input.
/// Bitrates never fall below their floors; only the last-resort tier is
/// allowed to drop bitrate targeting entirely.
#[derive(Copy, Clone, Debug)]
pub struct RateState {
    pub video_kbps: u32,
    pub audio_kbps: u32,
    pub max_width: u32,
    pub attempts: u32,
    pub tier: Tier,
}

impl RateState {
    pub fn enter_tier(&mut self, tier: Tier, max_width: u32) {
        self.tier = tier;
        self.max_width = max_width;
        self.attempts = 0;
    }
}

/// Knobs for one run of the retry loop. The primary tier and both rescue
/// phases share the loop and differ only here.
#[derive(Copy, Clone, Debug)]
pub struct TierParams {
    pub tier: Tier,
    pub retry_ceiling: u32,
    pub video_floor_kbps: u32,
    pub audio_floor_kbps: u32,
    pub audio_step_kbps: u32,
    pub damping: f64,
    pub allow_audio_stepdown: bool,
    pub max_width: u32,
}

/// How a tier ended. Encoder crashes are never retried: a failed process
/// signals an environment or input problem, not a rate-control problem.
#[derive(Clone, Debug)]
pub enum TierOutcome {
    Fit { size_bytes: u64 },
    FloorReached,
    Exhausted,
    EncodeFailed { detail: String },
}

/// Everything an encode attempt needs besides the rate state itself.
pub struct AttemptContext<'a> {
    pub encoder: &'a dyn Encoder,
    pub input: &'a Path,
    pub output: &'a Path,
    pub pass_log: &'a Path,
    pub preset: &'a str,
    pub normalize_audio: bool,
    pub target_mb: f64,
    pub ceiling_bytes: u64,
}

impl<'a> AttemptContext<'a> {
    fn two_pass_job(&self, state: &RateState, pass: u8) -> EncodeJob {
        EncodeJob {
            input: self.input.to_path_buf(),
            output: self.output.to_path_buf(),
            video: VideoSpec::Bitrate {
                kbps: state.video_kbps,
            },
            audio: AudioSpec {
                kbps: state.audio_kbps,
                normalize: self.normalize_audio,
            },
            max_width: state.max_width,
            pass: Some(pass),
            pass_log: Some(self.pass_log.to_path_buf()),
            preset: self.preset.to_string(),
        }
    }

    /// Pass 1 (analysis) then pass 2 (mux). A failure on either pass is the
    /// attempt's failure.
    pub fn run_two_pass(&self, state: &RateState) -> EncodeOutcome {
        let first = self.encoder.encode(&self.two_pass_job(state, 1));
        if !first.success {
            return first;
        }
        self.encoder.encode(&self.two_pass_job(state, 2))
    }
}

/// Drive encode-evaluate-adjust cycles within one tier until the output
/// fits under the ceiling, a floor blocks further reduction, or the retry
/// ceiling is exhausted. Video bitrate is always reduced before audio;
/// audio steps down only once video sits at its floor.
pub fn run_tier(ctx: &AttemptContext, state: &mut RateState, params: &TierParams) -> TierOutcome {
    state.enter_tier(params.tier, params.max_width);

    while state.attempts < params.retry_ceiling {
        state.attempts += 1;
        info!(
            "{:?} attempt {}/{}: video {} kbps, audio {} kbps, width <= {}",
            state.tier, state.attempts, params.retry_ceiling, state.video_kbps, state.audio_kbps,
            state.max_width
        );

        let outcome = ctx.run_two_pass(state);
        if !outcome.success {
            let detail = outcome
                .detail
                .unwrap_or_else(|| "encoder exited with an error".to_string());
            warn!("Encode failed, not retrying: {}", detail);
            return TierOutcome::EncodeFailed { detail };
        }

        let size_bytes = outcome.size_bytes;
        if size_bytes <= ctx.ceiling_bytes {
            info!(
                "Fit at {:.2} MB after {} attempt(s)",
                model::bytes_to_mb(size_bytes),
                state.attempts
            );
            return TierOutcome::Fit { size_bytes };
        }

        let achieved_mb = model::bytes_to_mb(size_bytes);
        let reduced = model::reduce_on_overshoot(
            state.video_kbps,
            achieved_mb,
            ctx.target_mb,
            params.damping,
        );
        debug!(
            "Overshot at {:.2} MB (target {:.2} MB); video {} -> {} kbps",
            achieved_mb, ctx.target_mb, state.video_kbps, reduced
        );

        if reduced < params.video_floor_kbps {
            state.video_kbps = params.video_floor_kbps;
            if params.allow_audio_stepdown && state.audio_kbps > params.audio_floor_kbps {
                let stepped = state
                    .audio_kbps
                    .saturating_sub(params.audio_step_kbps)
                    .max(params.audio_floor_kbps);
                debug!(
                    "Video floor reached; stepping audio {} -> {} kbps",
                    state.audio_kbps, stepped
                );
                state.audio_kbps = stepped;
            } else {
                info!("Both bitrate floors reached without converging");
                return TierOutcome::FloorReached;
            }
        } else {
            state.video_kbps = reduced;
        }
    }

    info!(
        "{:?} tier exhausted after {} attempts",
        params.tier, params.retry_ceiling
    );
    TierOutcome::Exhausted
}
