//! Seed proposals for the next round.
//!
//! Rounds 1 and 2 are pure random sampling. From round 3 on, every row but
//! the last explores around the score-weighted centroid of all favorites so
//! far, with noise that widens quadratically by row; the last row is always
//! fresh standard-normal seeds.

use rand::Rng;
use rand_distr::{Distribution, Normal, StandardNormal};
use thiserror::Error;

use crate::session::FeedbackRecord;

pub type SeedVector = Vec<f32>;

/// First stage that reseeds from feedback; earlier stages sample at random.
pub const FIRST_GUIDED_STAGE: u32 = 3;

const EXPLORATION_SCALE_STEP: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReseedError {
    #[error("stage {stage} needs at least one favorite but the history is empty")]
    EmptyHistory { stage: u32 },
    #[error("seed has {actual} values, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid exploration noise scale {0}")]
    NoiseScale(f64),
}

/// Standard deviation of the noise added to row `row` (0-based) of the
/// exploration band: `(row + 1)^2 * 0.1`.
pub fn exploration_scale(row: usize) -> f64 {
    let step = (row + 1) as f64;
    step * step * EXPLORATION_SCALE_STEP
}

pub fn random_seed<R: Rng + ?Sized>(dimension: usize, rng: &mut R) -> SeedVector {
    (0..dimension)
        .map(|_| rng.sample::<f32, _>(StandardNormal))
        .collect()
}

/// `Σ seed_i · b^score_i / Σ b^score_i`, or `None` for an empty history.
///
/// Weights are taken relative to the best score, `b^(score_i - max)`, which
/// gives the same ratios and stays finite for any base.
pub fn exploitation_centroid<'a>(
    history: impl IntoIterator<Item = (&'a [f32], u8)>,
    score_basic: f64,
    dimension: usize,
) -> Result<Option<Vec<f64>>, ReseedError> {
    let history = history.into_iter().collect::<Vec<(&[f32], u8)>>();
    let Some(best) = history.iter().map(|(_, score)| *score).max() else {
        return Ok(None);
    };

    let mut weighted = vec![0.0f64; dimension];
    let mut total_weight = 0.0f64;
    for (seed, score) in history {
        if seed.len() != dimension {
            return Err(ReseedError::DimensionMismatch {
                expected: dimension,
                actual: seed.len(),
            });
        }
        let weight = score_basic.powi(i32::from(score) - i32::from(best));
        for (acc, value) in weighted.iter_mut().zip(seed) {
            *acc += f64::from(*value) * weight;
        }
        total_weight += weight;
    }

    Ok(Some(
        weighted
            .into_iter()
            .map(|value| value / total_weight)
            .collect(),
    ))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReseedingStrategy {
    pub rows: usize,
    pub cols: usize,
    pub score_basic: f64,
}

impl ReseedingStrategy {
    pub fn new(rows: usize, cols: usize, score_basic: f64) -> Self {
        Self {
            rows,
            cols,
            score_basic,
        }
    }

    pub fn candidates(&self) -> usize {
        self.rows * self.cols
    }

    /// Seeds for round `stage`, in row-major grid order.
    ///
    /// Only `attractive` feedback is consulted, and only from stage 3 on.
    pub fn next_seeds<R: Rng + ?Sized>(
        &self,
        stage: u32,
        attractive: &[FeedbackRecord],
        dimension: usize,
        rng: &mut R,
    ) -> Result<Vec<SeedVector>, ReseedError> {
        if stage < FIRST_GUIDED_STAGE {
            return Ok((0..self.candidates())
                .map(|_| random_seed(dimension, rng))
                .collect());
        }

        let centroid = exploitation_centroid(
            attractive
                .iter()
                .map(|record| (record.seed.as_slice(), record.score)),
            self.score_basic,
            dimension,
        )?
        .ok_or(ReseedError::EmptyHistory { stage })?;

        let mut seeds = Vec::with_capacity(self.candidates());
        for row in 0..self.rows.saturating_sub(1) {
            let scale = exploration_scale(row);
            let noise = Normal::new(0.0, scale).map_err(|_| ReseedError::NoiseScale(scale))?;
            for _ in 0..self.cols {
                seeds.push(
                    centroid
                        .iter()
                        .map(|center| (center + noise.sample(rng)) as f32)
                        .collect(),
                );
            }
        }
        for _ in 0..self.cols {
            seeds.push(random_seed(dimension, rng));
        }
        Ok(seeds)
    }
}
