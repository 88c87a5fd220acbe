//! The list-matching searches.
//!
//! Layered bottom-up:
//!
//! - [`segment`] — the invariant representation of bright-star pairs;
//! - [`rotshift`] — the combinatorial rotation/scale/shift search, with and
//!   without an axis flip;
//! - [`shift`] — the translation-only search for when rotation and scale
//!   are already known;
//! - [`collect`] — correspondence collection under a transformation guess;
//! - [`refine`] — the order-increasing refinement driver and the top-level
//!   orchestrators.

pub mod collect;
pub mod refine;
pub mod rotshift;
pub mod segment;
pub mod shift;

use std::cmp::Ordering;

use thiserror::Error;

use crate::matches::StarMatchList;

// ── Outcomes ────────────────────────────────────────────────────────────────

/// Why a matching operation produced no result.
#[derive(Debug, Clone, Error)]
pub enum MatchError {
    /// A list is too small for the requested search.
    #[error("insufficient points for matching ({0} and {1} stars)")]
    InsufficientPoints(usize, usize),

    /// The segment-pair vote produced no histogram peak at all. Usually the
    /// relative scale of the lists falls outside the configured ratio
    /// window.
    #[error("no pair match: no segment-pair vote landed in the ratio window [{0}, {1}]")]
    NoPairMatch(f64, f64),

    /// Candidates were found but every one was rejected.
    #[error("no viable solution: all candidate matches were rejected")]
    NoViableSolution,

    /// The least-squares fit could not be performed or produced a singular
    /// transformation.
    #[error("degenerate fit: {0}")]
    DegenerateFit(String),

    /// The configuration fails validation.
    #[error("invalid match conditions: {0}")]
    InvalidConditions(String),
}

// ── Configuration ───────────────────────────────────────────────────────────

/// Which combinatorial voting scheme to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// Nested dense histograms: a 2-D ratio/angle vote, then a 2-D rank
    /// vote inside each ratio/angle peak.
    RatioAngleHisto,
    /// One sparse 4-D histogram over `(ratio, angle, rank₁, rank₂)`.
    #[default]
    SparseFourD,
}

/// Tuning of the combinatorial search.
#[derive(Debug, Clone)]
pub struct MatchConditions {
    /// Number of bright stars from the first list used to build segments.
    pub nstars_l1: usize,
    /// Number of bright stars from the second list used to build segments.
    pub nstars_l2: usize,
    /// How many histogram peaks to investigate in each voting stage.
    pub max_trial_count: usize,
    /// Sigma-clipping threshold for the iterative refit of candidates.
    pub nsigmas: f64,
    /// Bound on the allowable translation along x.
    pub max_shift_x: f64,
    /// Bound on the allowable translation along y.
    pub max_shift_y: f64,
    /// Expected destination/source scale ratio.
    pub size_ratio: f64,
    /// Half-width of the accepted ratio window around `size_ratio`.
    pub delta_size_ratio: f64,
    /// Fractional floor on an acceptable match size, relative to the
    /// smaller input list.
    pub min_match_ratio: f64,
    /// 0 = quiet; ≥ 1 enables per-peak diagnostic traces.
    pub print_level: u32,
    /// Voting scheme.
    pub algorithm: Algorithm,
}

impl Default for MatchConditions {
    fn default() -> Self {
        Self {
            nstars_l1: 70,
            nstars_l2: 70,
            max_trial_count: 4,
            nsigmas: 3.0,
            max_shift_x: 50.0,
            max_shift_y: 50.0,
            size_ratio: 1.0,
            delta_size_ratio: 0.1,
            min_match_ratio: 1.0 / 3.0,
            print_level: 0,
            algorithm: Algorithm::default(),
        }
    }
}

impl MatchConditions {
    /// Lower edge of the accepted scale-ratio window.
    pub fn min_size_ratio(&self) -> f64 {
        self.size_ratio - self.delta_size_ratio
    }

    /// Upper edge of the accepted scale-ratio window.
    pub fn max_size_ratio(&self) -> f64 {
        self.size_ratio + self.delta_size_ratio
    }

    /// Check the configuration rows that would make the search meaningless.
    pub fn validate(&self) -> Result<(), MatchError> {
        if self.nstars_l1 == 0 || self.nstars_l2 == 0 {
            return Err(MatchError::InvalidConditions(
                "nstars_l1 and nstars_l2 must be positive".into(),
            ));
        }
        if !(self.nsigmas > 0.0) {
            return Err(MatchError::InvalidConditions(
                "nsigmas must be positive".into(),
            ));
        }
        if self.min_size_ratio() >= self.max_size_ratio() {
            return Err(MatchError::InvalidConditions(format!(
                "empty size-ratio window [{}, {}]",
                self.min_size_ratio(),
                self.max_size_ratio()
            )));
        }
        if self.max_trial_count == 0 {
            return Err(MatchError::InvalidConditions(
                "max_trial_count must be positive".into(),
            ));
        }
        Ok(())
    }
}

// ── Candidate quality ───────────────────────────────────────────────────────

/// Order two candidate solutions, best first: more matches wins, ties break
/// by smaller summed squared residual.
///
/// This is a strict weak order on `(len, dist2)`; sorting candidate vectors
/// with it yields the best solution at index 0.
pub fn compare_quality(a: &StarMatchList, b: &StarMatchList) -> Ordering {
    b.len()
        .cmp(&a.len())
        .then_with(|| a.dist2().partial_cmp(&b.dist2()).unwrap_or(Ordering::Equal))
}
