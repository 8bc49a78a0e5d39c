//! Pixel-difference heuristics for liveness and face match.
//!
//! Both checks reduce to [`image_difference`]: the sum of absolute
//! per-channel RGB differences between two equally sized buffers,
//! divided by the pixel count. It is a placeholder, not a biometric
//! control: lighting, framing and pose all move the score.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes per pixel in the packed RGB buffers this module consumes.
pub const RGB_CHANNELS: usize = 3;

pub const DEFAULT_LIVENESS_THRESHOLD: f64 = 50.0;
pub const DEFAULT_MATCH_THRESHOLD: f64 = 80.0;
pub const DEFAULT_LIVENESS_SAMPLES: usize = 12;
pub const DEFAULT_LIVENESS_INTERVAL_MS: u64 = 120;
pub const DEFAULT_LIVENESS_WIDTH: u32 = 160;
/// Height used for liveness frames when the source reports no dimensions.
pub const FALLBACK_LIVENESS_HEIGHT: u32 = 120;
pub const DEFAULT_MATCH_SIZE: u32 = 120;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimilarityError {
    #[error("buffer length mismatch: expected {expected} bytes, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("image has no pixels")]
    Empty,
}

/// Thresholds and sampling parameters for both heuristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityPolicy {
    /// Accumulated motion score must exceed this to count as live.
    pub liveness_threshold: f64,
    /// Match score must stay below this to count as the same face.
    pub match_threshold: f64,
    pub liveness_samples: usize,
    pub liveness_interval_ms: u64,
    pub liveness_width: u32,
    /// Side of the square both images are resampled to before matching.
    pub match_size: u32,
}

impl Default for SimilarityPolicy {
    fn default() -> Self {
        Self {
            liveness_threshold: DEFAULT_LIVENESS_THRESHOLD,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            liveness_samples: DEFAULT_LIVENESS_SAMPLES,
            liveness_interval_ms: DEFAULT_LIVENESS_INTERVAL_MS,
            liveness_width: DEFAULT_LIVENESS_WIDTH,
            match_size: DEFAULT_MATCH_SIZE,
        }
    }
}

impl SimilarityPolicy {
    /// Liveness frame height for a source of the given dimensions, keeping
    /// its aspect ratio at `liveness_width`.
    pub fn liveness_height(&self, source_width: u32, source_height: u32) -> u32 {
        proportional_height(
            self.liveness_width,
            source_width,
            source_height,
            FALLBACK_LIVENESS_HEIGHT,
        )
    }
}

/// Height that preserves `source_width:source_height` at `target_width`.
///
/// Falls back to `fallback` when the source has no usable dimensions.
pub fn proportional_height(
    target_width: u32,
    source_width: u32,
    source_height: u32,
    fallback: u32,
) -> u32 {
    if source_width == 0 || source_height == 0 {
        return fallback;
    }
    let h = (source_height as f64 / source_width as f64 * target_width as f64).round() as u32;
    if h == 0 {
        fallback
    } else {
        h
    }
}

/// Mean absolute per-channel difference between two packed RGB buffers.
///
/// Both buffers must hold exactly `width * height * 3` bytes. The sum of
/// |ΔR| + |ΔG| + |ΔB| over all pixels is divided by the pixel count, so
/// the result lies in `0.0..=765.0`. Lower means more similar.
pub fn image_difference(
    a: &[u8],
    b: &[u8],
    width: u32,
    height: u32,
) -> Result<f64, SimilarityError> {
    let pixels = width as usize * height as usize;
    if pixels == 0 {
        return Err(SimilarityError::Empty);
    }
    let expected = pixels * RGB_CHANNELS;
    for buf in [a, b] {
        if buf.len() != expected {
            return Err(SimilarityError::DimensionMismatch {
                expected,
                actual: buf.len(),
            });
        }
    }

    let diff: u64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| x.abs_diff(y) as u64)
        .sum();

    Ok(diff as f64 / pixels as f64)
}

/// Outcome of a liveness sampling run.
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessResult {
    pub is_live: bool,
    /// Sum of per-pair image differences across the sampling window.
    pub motion_score: f64,
    pub frame_pairs: usize,
}

/// Accumulates frame-to-frame motion as liveness samples arrive.
///
/// Every frame must have the dimensions the accumulator was built with.
#[derive(Debug)]
pub struct MotionAccumulator {
    width: u32,
    height: u32,
    prev: Option<Vec<u8>>,
    score: f64,
    pairs: usize,
}

impl MotionAccumulator {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            prev: None,
            score: 0.0,
            pairs: 0,
        }
    }

    /// Add the next sampled frame, scoring it against the previous one.
    pub fn push(&mut self, frame: Vec<u8>) -> Result<(), SimilarityError> {
        if let Some(prev) = &self.prev {
            self.score += image_difference(prev, &frame, self.width, self.height)?;
            self.pairs += 1;
        } else {
            // Validate the first frame too so a bad sequence fails early.
            let expected = self.width as usize * self.height as usize * RGB_CHANNELS;
            if expected == 0 {
                return Err(SimilarityError::Empty);
            }
            if frame.len() != expected {
                return Err(SimilarityError::DimensionMismatch {
                    expected,
                    actual: frame.len(),
                });
            }
        }
        self.prev = Some(frame);
        Ok(())
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn finish(self, threshold: f64) -> LivenessResult {
        LivenessResult {
            is_live: self.score > threshold,
            motion_score: self.score,
            frame_pairs: self.pairs,
        }
    }
}

/// Score a complete sequence of equally sized frames for liveness.
pub fn check_liveness<'a, I>(
    frames: I,
    width: u32,
    height: u32,
    threshold: f64,
) -> Result<LivenessResult, SimilarityError>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut acc = MotionAccumulator::new(width, height);
    for frame in frames {
        acc.push(frame.to_vec())?;
    }
    Ok(acc.finish(threshold))
}

/// Outcome of comparing a captured frame with a stored template.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Mean per-pixel difference; lower is more similar.
    pub score: f64,
}

/// Compare two `size`×`size` RGB buffers against the match threshold.
pub fn check_match(
    captured: &[u8],
    template: &[u8],
    size: u32,
    threshold: f64,
) -> Result<MatchResult, SimilarityError> {
    let score = image_difference(captured, template, size, size)?;
    Ok(MatchResult {
        matched: score < threshold,
        score,
    })
}
