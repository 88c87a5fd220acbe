//! Star correspondences and their robust refit.
//!
//! A [`StarMatchList`] owns an ordered set of point-to-point correspondences
//! together with the transformation most recently fit to them. The list
//! records the polynomial order its next fit must target;
//! [`refine`](StarMatchList::refine) alternates least-squares fits with
//! sigma-clipping until the membership stabilises.

use std::rc::Rc;

use tracing::debug;

use crate::matcher::MatchError;
use crate::star::{BaseStar, FatPoint, Point};
use crate::transfo::fit::fit_transfo;
use crate::transfo::Transfo;

/// Maximum fit/clip rounds in one [`StarMatchList::refine`] call.
const MAX_REFINE_ITER: usize = 20;

/// Below this RMS residual the fit is exact and clipping would only remove
/// floating-point dust.
const EXACT_RMS: f64 = 1e-12;

// ── StarMatch ───────────────────────────────────────────────────────────────

/// One correspondence: a source point, a destination point, handles to the
/// stars they came from, and the residual distance under the owning list's
/// transformation.
#[derive(Debug, Clone)]
pub struct StarMatch {
    pub point1: FatPoint,
    pub point2: FatPoint,
    pub star1: Rc<BaseStar>,
    pub star2: Rc<BaseStar>,
    pub distance: f64,
}

impl StarMatch {
    pub fn new(
        point1: FatPoint,
        point2: FatPoint,
        star1: Rc<BaseStar>,
        star2: Rc<BaseStar>,
    ) -> Self {
        Self {
            point1,
            point2,
            star1,
            star2,
            distance: 0.0,
        }
    }

    /// Mahalanobis squared residual of this pair under `transfo`, weighting
    /// by the summed covariance of the transformed source point and the
    /// destination point. With default unit ellipses this is half the
    /// squared Euclidean residual.
    pub fn chi2_under(&self, transfo: &Transfo) -> f64 {
        let q = transfo.apply_with_errors(&self.point1);
        let vx = q.vx + self.point2.vx;
        let vy = q.vy + self.point2.vy;
        let vxy = q.vxy + self.point2.vxy;
        let dx = self.point2.x - q.x;
        let dy = self.point2.y - q.y;
        let det = vx * vy - vxy * vxy;
        if det <= 1e-20 {
            return dx * dx + dy * dy;
        }
        (vy * dx * dx + vx * dy * dy - 2.0 * vxy * dx * dy) / det
    }
}

// ── StarMatchList ───────────────────────────────────────────────────────────

/// An ordered set of correspondences plus the transformation fit to them.
#[derive(Debug, Clone)]
pub struct StarMatchList {
    matches: Vec<StarMatch>,
    transfo: Transfo,
    order: usize,
    chi2: f64,
    dof: i64,
}

impl Default for StarMatchList {
    fn default() -> Self {
        Self::new()
    }
}

impl StarMatchList {
    /// An empty list associated with the identity transformation and an
    /// order-1 (linear) fit target.
    pub fn new() -> Self {
        Self::with_transfo(Transfo::Identity)
    }

    /// An empty list associated with `transfo`.
    pub fn with_transfo(transfo: Transfo) -> Self {
        Self {
            matches: Vec::new(),
            transfo,
            order: 1,
            chi2: 0.0,
            dof: 0,
        }
    }

    pub fn push(&mut self, m: StarMatch) {
        self.matches.push(m);
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StarMatch> {
        self.matches.iter()
    }

    pub fn matches(&self) -> &[StarMatch] {
        &self.matches
    }

    /// The transformation most recently fit to (or associated with) the
    /// current membership.
    pub fn transfo(&self) -> &Transfo {
        &self.transfo
    }

    pub fn set_transfo(&mut self, transfo: Transfo) {
        self.transfo = transfo;
    }

    /// Polynomial order the next fit will target.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Promote (or demote) the order of subsequent fits. Order 0 is a pure
    /// shift, 1 a full affine map, ≥ 2 a polynomial.
    pub fn set_order(&mut self, order: usize) {
        self.order = order;
    }

    /// Chi-squared of the last refine, and its degrees of freedom.
    pub fn chi2(&self) -> f64 {
        self.chi2
    }

    pub fn dof(&self) -> i64 {
        self.dof
    }

    /// Sum of squared residual distances across all pairs.
    pub fn dist2(&self) -> f64 {
        self.matches.iter().map(|m| m.distance * m.distance).sum()
    }

    /// RMS residual distance; zero for an empty list.
    pub fn residual(&self) -> f64 {
        if self.matches.is_empty() {
            0.0
        } else {
            (self.dist2() / self.matches.len() as f64).sqrt()
        }
    }

    /// Chi-squared of the current membership under an arbitrary
    /// transformation.
    pub fn chi2_under(&self, transfo: &Transfo) -> f64 {
        self.matches.iter().map(|m| m.chi2_under(transfo)).sum()
    }

    /// Transform the source points of every pair (errors propagated).
    ///
    /// Used by the translation search to express its matches in the frame
    /// of the incoming guess before the linear refit.
    pub fn apply_transfo(&mut self, transfo: &Transfo) {
        for m in &mut self.matches {
            m.point1 = transfo.apply_with_errors(&m.point1);
        }
    }

    /// Recompute every pair's residual distance under the current
    /// transformation.
    fn update_distances(&mut self) {
        for m in &mut self.matches {
            m.distance = self.transfo.apply(m.point1.point()).distance(m.point2.point());
        }
    }

    fn fit_pairs(&self) -> Vec<(Point, Point)> {
        self.matches
            .iter()
            .map(|m| (m.point1.point(), m.point2.point()))
            .collect()
    }

    /// Iteratively fit a transformation of the current order and drop pairs
    /// whose residual exceeds `nsigmas` times the RMS residual, until the
    /// membership stabilises.
    ///
    /// On success the list's transformation, per-pair distances, chi² and
    /// degrees of freedom reflect the final fit. Fails when the (possibly
    /// clipped) membership can no longer constrain the fit; the list then
    /// keeps its last consistent state.
    pub fn refine(&mut self, nsigmas: f64) -> Result<(), MatchError> {
        for _ in 0..MAX_REFINE_ITER {
            let fitted = fit_transfo(&self.fit_pairs(), self.order)?;
            self.transfo = fitted;
            self.update_distances();

            let n = self.matches.len();
            let rms = (self.dist2() / n as f64).sqrt();
            if rms < EXACT_RMS {
                break;
            }

            let cut = nsigmas * rms;
            let before = n;
            self.matches.retain(|m| m.distance <= cut);
            if self.matches.len() == before {
                break;
            }
            debug!(
                "sigma clip: {} -> {} pairs (cut {:.3})",
                before,
                self.matches.len(),
                cut
            );
        }

        let transfo = self.transfo.clone();
        self.chi2 = self.chi2_under(&transfo);
        self.dof = 2 * self.matches.len() as i64 - self.transfo.npar() as i64;
        Ok(())
    }

    /// Fit the inverse transformation by swapping the roles of source and
    /// destination, at the list's current order.
    pub fn inverse_transfo(&self) -> Result<Transfo, MatchError> {
        let swapped: Vec<(Point, Point)> = self
            .matches
            .iter()
            .map(|m| (m.point2.point(), m.point1.point()))
            .collect();
        fit_transfo(&swapped, self.order)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
