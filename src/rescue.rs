use log::{info, warn};

use crate::config::Settings;
use crate::encoder::{AudioSpec, EncodeJob, VideoSpec};
use crate::model;
use crate::rate::{AttemptContext, RateState, Tier, TierOutcome, TierParams};

/// How the rescue waterfall ended. `Exhausted` leaves splitting as the only
/// remaining strategy; `EncodeFailed` is terminal for the branch.
#[derive(Clone, Debug)]
pub enum RescueOutcome {
    Fit { tier: Tier, size_bytes: u64 },
    Exhausted,
    EncodeFailed { detail: String },
}

/// Two-phase fallback once the primary tier cannot converge, then a single
/// constant-quality shot.
///
/// Phase A restarts at original resolution with the bitrate recomputed
/// from scratch against the floor audio budget (the primary tier's failure
/// implies the richer audio budget was unaffordable). Phase B drops to the
/// secondary resolution cap, carrying the bitrate over and reducing with
/// damping so the smaller frame converges in fewer wasted encodes. If both
/// exhaust, one constant-quality encode gets a final shot at landing under
/// the ceiling without exact size control.
pub fn run_rescue(
    ctx: &AttemptContext,
    state: &mut RateState,
    settings: &Settings,
    duration_secs: f64,
) -> RescueOutcome {
    // Phase A: floor-audio restart at original resolution.
    let derived = model::derive_video_bitrate(
        settings.target_bytes(),
        duration_secs,
        settings.audio_floor_kbps,
        settings.overhead_bytes(),
        settings.video_floor_kbps,
    );
    if derived.clamped_to_floor {
        warn!("Rescue budget already sits at the video floor; convergence unlikely");
    }
    state.video_kbps = derived.kbps;
    state.audio_kbps = settings.audio_floor_kbps;

    let phase_a = TierParams {
        tier: Tier::RescuePrimary,
        retry_ceiling: settings.max_retries,
        video_floor_kbps: settings.video_floor_kbps,
        audio_floor_kbps: settings.audio_floor_kbps,
        audio_step_kbps: settings.audio_step_kbps,
        damping: 1.0,
        allow_audio_stepdown: false,
        max_width: settings.primary_max_width,
    };
    match run_phase(ctx, state, &phase_a) {
        PhaseResult::Fit(size_bytes) => {
            return RescueOutcome::Fit {
                tier: Tier::RescuePrimary,
                size_bytes,
            }
        }
        PhaseResult::EncodeFailed(detail) => return RescueOutcome::EncodeFailed { detail },
        PhaseResult::Continue => {}
    }

    // Phase B: downscale, bitrate carried over and re-clamped.
    info!(
        "Downscaling to width <= {} for rescue",
        settings.rescue_max_width
    );
    state.video_kbps = state.video_kbps.max(settings.video_floor_kbps);
    let phase_b = TierParams {
        tier: Tier::RescueDownscale,
        damping: settings.rescue_damping,
        max_width: settings.rescue_max_width,
        ..phase_a
    };
    match run_phase(ctx, state, &phase_b) {
        PhaseResult::Fit(size_bytes) => {
            return RescueOutcome::Fit {
                tier: Tier::RescueDownscale,
                size_bytes,
            }
        }
        PhaseResult::EncodeFailed(detail) => return RescueOutcome::EncodeFailed { detail },
        PhaseResult::Continue => {}
    }

    last_resort(ctx, state, settings)
}

enum PhaseResult {
    Fit(u64),
    EncodeFailed(String),
    Continue,
}

fn run_phase(ctx: &AttemptContext, state: &mut RateState, params: &TierParams) -> PhaseResult {
    match crate::rate::run_tier(ctx, state, params) {
        TierOutcome::Fit { size_bytes } => PhaseResult::Fit(size_bytes),
        TierOutcome::EncodeFailed { detail } => PhaseResult::EncodeFailed(detail),
        TierOutcome::FloorReached | TierOutcome::Exhausted => PhaseResult::Continue,
    }
}

/// One single-pass constant-quality encode at the downscaled resolution
/// with audio at floor. Abandons exact size control for a shot that is
/// likely, but not guaranteed, to land under the ceiling.
fn last_resort(ctx: &AttemptContext, state: &mut RateState, settings: &Settings) -> RescueOutcome {
    state.enter_tier(Tier::LastResort, settings.rescue_max_width);
    state.audio_kbps = settings.audio_floor_kbps;
    info!(
        "Last resort: single constant-quality pass (crf {})",
        settings.last_resort_crf
    );

    let job = EncodeJob {
        input: ctx.input.to_path_buf(),
        output: ctx.output.to_path_buf(),
        video: VideoSpec::Quality {
            crf: settings.last_resort_crf,
        },
        audio: AudioSpec {
            kbps: settings.audio_floor_kbps,
            normalize: ctx.normalize_audio,
        },
        max_width: settings.rescue_max_width,
        pass: None,
        pass_log: None,
        preset: settings.preset.clone(),
    };

    let outcome = ctx.encoder.encode(&job);
    if !outcome.success {
        let detail = outcome
            .detail
            .unwrap_or_else(|| "encoder exited with an error".to_string());
        return RescueOutcome::EncodeFailed { detail };
    }
    if outcome.size_bytes <= ctx.ceiling_bytes {
        RescueOutcome::Fit {
            tier: Tier::LastResort,
            size_bytes: outcome.size_bytes,
        }
    } else {
        info!(
            "Last resort still overshot at {:.2} MB; rescue has failed",
            model::bytes_to_mb(outcome.size_bytes)
        );
        RescueOutcome::Exhausted
    }
}
