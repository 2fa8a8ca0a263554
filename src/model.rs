//! Container-size arithmetic: everything here is pure math over the target
//! size, duration and bitrate budget. No I/O, no encoder knowledge.

/// Overshoot ratios closer to 1.0 than this are clamped up so every
/// reduction step makes real progress; without it a near-miss overshoot
/// (ratio ~1.001) would shave almost nothing off the bitrate and the retry
/// loop could spin on rounding noise.
pub const MIN_OVERSHOOT_RATIO: f64 = 1.05;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

pub fn mb_to_bytes(mb: f64) -> u64 {
    (mb * BYTES_PER_MB) as u64
}

/// Video bitrate derived from the size budget, in kbps, plus whether the
/// floor clamp fired. A clamped result means the target may be unreachable
/// at this tier; callers must not treat it as a silent success.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DerivedBitrate {
    pub kbps: u32,
    pub clamped_to_floor: bool,
}

/// Back-calculate the video bitrate that fills `target_bytes` over
/// `duration_secs` once the audio track and container overhead are paid for.
///
/// `duration_secs` must be positive; probe failures are rejected upstream
/// and never reach this function.
pub fn derive_video_bitrate(
    target_bytes: u64,
    duration_secs: f64,
    audio_kbps: u32,
    overhead_bytes: u64,
    video_floor_kbps: u32,
) -> DerivedBitrate {
    debug_assert!(duration_secs > 0.0);

    let audio_bytes = audio_kbps as f64 * 1000.0 * duration_secs / 8.0;
    let video_budget = target_bytes as f64 - audio_bytes - overhead_bytes as f64;
    let bps = (video_budget * 8.0 / duration_secs).floor();
    let kbps = if bps > 0.0 { (bps / 1000.0) as u32 } else { 0 };

    if kbps < video_floor_kbps {
        DerivedBitrate {
            kbps: video_floor_kbps,
            clamped_to_floor: true,
        }
    } else {
        DerivedBitrate {
            kbps,
            clamped_to_floor: false,
        }
    }
}

/// Proportional bitrate reduction after an overshoot. The ratio is clamped
/// to [`MIN_OVERSHOOT_RATIO`] so the result is a strict decrease; `damping`
/// below 1.0 cuts harder and is used only in the downscale tier.
pub fn reduce_on_overshoot(
    current_kbps: u32,
    achieved_mb: f64,
    target_mb: f64,
    damping: f64,
) -> u32 {
    let ratio = (achieved_mb / target_mb).max(MIN_OVERSHOOT_RATIO);
    (current_kbps as f64 / ratio * damping).floor() as u32
}

/// Smallest output the floors allow for the full duration. When even this
/// exceeds the target the file is mathematically unreachable without
/// splitting, so the rescue tiers are skipped entirely.
pub fn min_achievable_bytes(
    video_floor_kbps: u32,
    audio_floor_kbps: u32,
    duration_secs: f64,
) -> f64 {
    (video_floor_kbps + audio_floor_kbps) as f64 * 1000.0 * duration_secs / 8.0
}
