use anyhow::{bail, Context, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::encoder::Encoder;
use crate::model;

/// A chosen cut point and the two segment files it produces. Lives only
/// until both children have reported their results.
#[derive(Clone, Debug)]
pub struct SplitPlan {
    pub cut_secs: f64,
    pub part1: PathBuf,
    pub part2: PathBuf,
}

/// True when even floor-bitrate video plus floor-bitrate audio for the full
/// duration would exceed the target, making every rescue tier pointless.
pub fn preflight_requires_split(settings: &Settings, duration_secs: f64) -> bool {
    let min_bytes = model::min_achievable_bytes(
        settings.video_floor_kbps,
        settings.audio_floor_kbps,
        duration_secs,
    );
    model::bytes_to_mb(min_bytes as u64) > settings.target_size_mb
}

pub fn splittable(settings: &Settings, duration_secs: f64) -> bool {
    duration_secs >= settings.min_split_secs
}

/// Pick the cut point: the nearest keyframe at or before the geometric
/// midpoint when one exists and sits past the sanity threshold (a
/// zero-offset match is a bogus answer, not a usable cut), otherwise the
/// midpoint itself.
pub fn choose_cut_point(
    encoder: &dyn Encoder,
    input: &Path,
    duration_secs: f64,
    keyframe_min_secs: f64,
) -> f64 {
    let midpoint = duration_secs / 2.0;
    match encoder.nearest_keyframe_before(input, midpoint) {
        Some(keyframe) if keyframe > keyframe_min_secs => {
            debug!(
                "Cutting at keyframe {:.3}s (midpoint {:.3}s)",
                keyframe, midpoint
            );
            keyframe
        }
        Some(keyframe) => {
            debug!(
                "Keyframe {:.3}s below sanity threshold; using midpoint {:.3}s",
                keyframe, midpoint
            );
            midpoint
        }
        None => {
            debug!("No keyframe before midpoint; cutting at {:.3}s", midpoint);
            midpoint
        }
    }
}

/// Cut the source losslessly into two segments and verify both are
/// non-empty. A zero-byte segment means the split failed; there is no
/// fallback beneath splitting.
pub fn cut_segments(
    encoder: &dyn Encoder,
    input: &Path,
    cut_secs: f64,
    part1: PathBuf,
    part2: PathBuf,
) -> Result<SplitPlan> {
    info!("Splitting '{}' at {:.3}s", input.display(), cut_secs);
    encoder
        .cut(input, cut_secs, &part1, &part2)
        .with_context(|| format!("Lossless cut of '{}' failed", input.display()))?;

    for part in [&part1, &part2] {
        if encoder.file_size(part) == 0 {
            bail!("split produced an empty segment '{}'", part.display());
        }
    }

    Ok(SplitPlan {
        cut_secs,
        part1,
        part2,
    })
}
