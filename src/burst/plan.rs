// src/burst/plan.rs - Evenly spaced capture positions for one bracketing run
use super::BurstError;
use crate::motion::MoveParams;

/// Cap used by [`BurstPlan::new`]; `burst.max_images` overrides it.
pub const DEFAULT_MAX_IMAGES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BurstPlan {
    pub start: i64,
    pub end: i64,
    pub image_count: usize,
    pub params: MoveParams,
}

impl BurstPlan {
    pub fn new(start: i64, end: i64, image_count: usize, params: MoveParams) -> Result<Self, BurstError> {
        Self::with_max_images(start, end, image_count, params, DEFAULT_MAX_IMAGES)
    }

    /// Needs between two and `max_images` images, and a range wide enough
    /// that no two images land on the same microstep (they would share a
    /// file name).
    pub fn with_max_images(
        start: i64,
        end: i64,
        image_count: usize,
        params: MoveParams,
        max_images: usize,
    ) -> Result<Self, BurstError> {
        if image_count < 2 {
            return Err(BurstError::InvalidPlan(format!(
                "image count must be at least 2 (got {})",
                image_count
            )));
        }
        if image_count > max_images {
            return Err(BurstError::InvalidPlan(format!(
                "image count must be at most {} (got {})",
                max_images, image_count
            )));
        }
        let span = (end as i128 - start as i128).unsigned_abs();
        if span < (image_count - 1) as u128 {
            return Err(BurstError::InvalidPlan(format!(
                "{} images need at least {} steps between start and end (got {})",
                image_count,
                image_count - 1,
                span
            )));
        }
        Ok(Self { start, end, image_count, params })
    }

    /// Distance from start to end in microsteps.
    pub fn span(&self) -> u64 {
        self.start.abs_diff(self.end)
    }

    pub fn positions(&self) -> Vec<i64> {
        (0..self.image_count)
            .map(|i| interpolate(self.start, self.end, i, self.image_count))
            .collect()
    }
}

/// Position `index` of `count` points spread linearly from `start` to `end`
/// inclusive, rounded half away from zero. Exact integer arithmetic.
pub fn interpolate(start: i64, end: i64, index: usize, count: usize) -> i64 {
    if count < 2 {
        return start;
    }
    let numerator = (end as i128 - start as i128) * index as i128;
    let denominator = (count - 1) as i128;
    (start as i128 + round_div(numerator, denominator)) as i64
}

fn round_div(numerator: i128, denominator: i128) -> i128 {
    let magnitude = (2 * numerator.abs() + denominator) / (2 * denominator);
    if numerator < 0 { -magnitude } else { magnitude }
}
