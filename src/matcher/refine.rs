//! Top-level orchestration: find a transformation, then polish it.
//!
//! [`list_match_combinatorial`] runs the flip-aware combinatorial search,
//! gates the outcome on determinant and match count, and retries with the
//! lists swapped before giving up. [`list_match_refine`] then alternates
//! correspondence collection with fits of increasing polynomial order until
//! the chi-squared stops improving.

use tracing::{debug, error, info, warn};

use crate::matcher::collect::list_match_collect;
use crate::matcher::rotshift::match_search_rot_shift_flip;
use crate::matcher::{MatchConditions, MatchError};
use crate::matches::StarMatchList;
use crate::star::BaseStarList;
use crate::transfo::Transfo;

// Calibration of the refinement driver, not a configuration surface.

/// Pair tolerance on the bright-star lists, in pixels.
const BRIGHT_DIST: f64 = 2.0;
/// Pair tolerance on the full lists, in pixels.
const FULL_DIST: f64 = 4.0;
/// Sigma-clipping threshold of the refit.
const NSIGMAS: f64 = 3.0;
/// Bright-star tail kept for the refit.
const NSTARS: usize = 500;
/// Inner-loop iteration cap per polynomial order.
const MAX_INNER_ITER: usize = 5;
/// Inner-loop convergence threshold on the inter-fit residual.
const CONVERGED_DIFF: f64 = 0.05;

// ── Quality gate ────────────────────────────────────────────────────────────

/// Accept a combinatorial solution only if its determinant is consistent
/// with the expected pixel-size ratio (within 20 %) and it matched more
/// than `nmin` pairs.
fn is_transfo_ok(m: &StarMatchList, pix_size_ratio2: f64, nmin: usize) -> bool {
    let Some(det) = m.transfo().determinant() else {
        error!("combinatorial solution has no determinant: {:?}", m.transfo());
        return false;
    };
    if (det.abs() - pix_size_ratio2).abs() / pix_size_ratio2 < 0.2 && m.len() > nmin {
        return true;
    }
    error!(
        "rejected combinatorial solution: determinant {det:.4} \
         (expected |det| near {pix_size_ratio2:.4}), {} pairs (needed > {nmin})",
        m.len()
    );
    false
}

// ── Residual metrics ────────────────────────────────────────────────────────

/// Mean Mahalanobis squared displacement between two transformations over a
/// list, weighted by the error ellipse that `t1` propagates.
fn transfo_diff(list: &BaseStarList, t1: &Transfo, t2: &Transfo) -> f64 {
    let mut diff2 = 0.0;
    let mut count = 0usize;
    for star in list.iter() {
        let q1 = t1.apply_with_errors(&star.fat_point());
        let q2 = t2.apply(star.point());
        let dx = q1.x - q2.x;
        let dy = q1.y - q2.y;
        let det = q1.cov_det();
        if det <= 0.0 {
            continue;
        }
        diff2 += (q1.vy * dx * dx + q1.vx * dy * dy - 2.0 * q1.vxy * dx * dy) / det;
        count += 1;
    }
    if count > 0 {
        diff2 / count as f64
    } else {
        0.0
    }
}

/// Median residual distance of a match list under a transformation.
fn median_distance(m: &StarMatchList, transfo: &Transfo) -> f64 {
    let mut resid: Vec<f64> = m
        .iter()
        .map(|m| transfo.apply(m.point1.point()).distance(m.point2.point()))
        .collect();
    if resid.is_empty() {
        return 0.0;
    }
    resid.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = resid.len();
    if n % 2 == 1 {
        resid[n / 2]
    } else {
        0.5 * (resid[n / 2 - 1] + resid[n / 2])
    }
}

// ── Orchestrators ───────────────────────────────────────────────────────────

/// Find the linear transformation relating two lists from scratch.
///
/// Runs the flip-aware combinatorial search in the direct orientation;
/// if the quality gate rejects the outcome, retries with source and
/// destination swapped and returns the inverse of that solution.
pub fn list_match_combinatorial(
    list1: &BaseStarList,
    list2: &BaseStarList,
    cond: &MatchConditions,
) -> Result<Transfo, MatchError> {
    cond.validate()?;
    info!(
        "combinatorial match between {} and {} stars",
        list1.len(),
        list2.len()
    );
    let pix_size_ratio2 = cond.size_ratio * cond.size_ratio;
    let nmin = 10usize.min((list1.len().min(list2.len()) as f64 * cond.min_match_ratio) as usize);

    match match_search_rot_shift_flip(list1, list2, cond) {
        Ok(m) if is_transfo_ok(&m, pix_size_ratio2, nmin) => {
            let transfo = m.transfo().clone();
            info!("found a direct transformation ({} pairs)", m.len());
            if cond.print_level >= 1 {
                debug!("direct transformation: {transfo:?}");
            }
            return Ok(transfo);
        }
        Ok(_) => error!("direct match failed the quality gate, trying reverse"),
        Err(e) => error!("direct match failed ({e}), trying reverse"),
    }

    let m = match_search_rot_shift_flip(list2, list1, cond)?;
    if is_transfo_ok(&m, pix_size_ratio2, nmin) {
        let transfo = m.inverse_transfo()?;
        info!("found a reverse transformation ({} pairs)", m.len());
        Ok(transfo)
    } else {
        error!("combinatorial match failed in both orientations");
        Err(MatchError::NoViableSolution)
    }
}

/// Polish a transformation by alternating correspondence collection with
/// sigma-clipped fits of increasing polynomial order.
///
/// Orders `1..=max_order` are tried on the 500 brightest stars of each list
/// (2-pixel pair tolerance); an order is adopted when it improves the
/// per-pair chi-squared by more than 1 %. A degenerate fit aborts the loop
/// and the best transformation found so far is returned.
pub fn list_match_refine(
    list1: &BaseStarList,
    list2: &BaseStarList,
    transfo: Transfo,
    max_order: usize,
) -> Transfo {
    let mut transfo = transfo;

    let mut l1 = list1.deep_copy();
    let mut l2 = list2.deep_copy();
    l1.flux_sort();
    l1.cut_tail(NSTARS);
    l2.flux_sort();
    l2.cut_tail(NSTARS);

    let mut full_match = list_match_collect(list1, list2, &transfo, FULL_DIST);
    let mut bright_match = list_match_collect(&l1, &l2, &transfo, BRIGHT_DIST);
    if bright_match.is_empty() {
        warn!("no bright-star pairs under the starting transformation; nothing to refine");
        return transfo;
    }
    let mut cur_chi2 = bright_match.chi2_under(&transfo) / bright_match.len() as f64;
    let mut nstarmin = 3usize;

    info!(
        "refine start: median residual {:.4}, {} full-list pairs",
        median_distance(&full_match, &transfo),
        full_match.len()
    );

    for order in 1..=max_order {
        let mut cur_transfo = bright_match.transfo().clone();

        // Re-fit on the bright stars until the transformation stops moving.
        let mut iter = 0usize;
        loop {
            bright_match.set_order(order);
            if let Err(e) = bright_match.refine(NSIGMAS) {
                warn!("refine aborted at order {order}: {e}");
                return transfo;
            }
            let trans_diff = transfo_diff(&l1, bright_match.transfo(), &cur_transfo);
            cur_transfo = bright_match.transfo().clone();
            bright_match = list_match_collect(&l1, &l2, &cur_transfo, BRIGHT_DIST);
            iter += 1;
            if bright_match.len() <= nstarmin || trans_diff <= CONVERGED_DIFF || iter >= MAX_INNER_ITER
            {
                break;
            }
        }

        let prev_chi2 = cur_chi2;
        if bright_match.is_empty() {
            warn!("refine lost every bright-star pair at order {order}");
            return transfo;
        }
        cur_chi2 = bright_match.chi2_under(&cur_transfo) / bright_match.len() as f64;

        full_match = list_match_collect(list1, list2, &cur_transfo, FULL_DIST);
        info!(
            "refine order {order}: median residual {:.4}, {} full-list pairs",
            median_distance(&full_match, &cur_transfo),
            full_match.len()
        );

        if (prev_chi2 - cur_chi2) > 0.01 * cur_chi2 && cur_chi2 > 0.0 {
            info!("order {order} is a better guess (chi2/pair {prev_chi2:.4} -> {cur_chi2:.4})");
            transfo = cur_transfo.clone();
        }
        nstarmin = cur_transfo.npar();
    }

    transfo
}
