//! Combinatorial rotation/scale/shift search.
//!
//! Segments from the two lists vote for the relative scale and rotation
//! relating them: a segment pair `(s₁, s₂)` with compatible length ratio
//! casts one vote at `(ratio, angle)`. The strongest peaks are then resolved
//! down to an *anchor* star pair, the first endpoints shared by the voting
//! segments, and the second endpoints of those segments become a candidate
//! correspondence set, which is fit and sigma-clipped. Candidates compete on
//! match count, ties broken by summed squared residuals.
//!
//! Two voting schemes are available (see [`Algorithm`](crate::Algorithm)):
//! nested dense 2-D histograms, or a single sparse 4-D histogram keyed by
//! `(ratio, angle, rank₁, rank₂)`.
//!
//! The flip-aware entry point runs the search twice, once with the first
//! list reflected about the x-axis, and keeps the better outcome. The flip
//! never touches the reported match coordinates; it is absorbed by the
//! fitted transformation.

use std::f64::consts::PI;

use tracing::{debug, error, info};

use crate::histogram::{Histo2d, SparseHisto4d};
use crate::matcher::segment::{segment_list, Segment};
use crate::matcher::{compare_quality, Algorithm, MatchConditions, MatchError};
use crate::matches::{StarMatch, StarMatchList};
use crate::star::BaseStarList;
use crate::transfo::{LinearTransfo, Transfo};

/// Bins on the length-ratio axis; odd so the expected ratio is a bin center.
const N_BINS_RATIO: usize = 21;
/// Bins on the angle axis; divisible by 4 so quarter turns are bin centers.
const N_BINS_ANGLE: usize = 180;

/// Half a bin width on the angle axis. The angle histogram spans
/// `[−π − offset, π − offset)` and votes above `π − offset` wrap down by
/// `2π`, so that `n·(π/2)` angles land on bin centers.
fn angle_offset() -> f64 {
    PI / N_BINS_ANGLE as f64
}

// ── Candidate extraction ────────────────────────────────────────────────────

/// Build a match list from the segment pairs anchored at `(rank1, rank2)`.
///
/// The shared first endpoints are stored once, then the second endpoints of
/// every anchored pair. Coordinates are the stars' actual positions; any
/// pre-transformation stays out of the stored matches.
fn match_list_extract(
    pairs: &[(&Segment, &Segment)],
    rank1: usize,
    rank2: usize,
) -> StarMatchList {
    let mut list = StarMatchList::new();
    for (seg1, seg2) in pairs {
        if seg1.s1rank != rank1 || seg2.s1rank != rank2 {
            continue;
        }
        if list.is_empty() {
            list.push(StarMatch::new(
                seg1.s1.fat_point(),
                seg2.s1.fat_point(),
                seg1.s1.clone(),
                seg2.s1.clone(),
            ));
        }
        list.push(StarMatch::new(
            seg1.s2.fat_point(),
            seg2.s2.fat_point(),
            seg1.s2.clone(),
            seg2.s2.clone(),
        ));
    }
    list
}

/// Refine a candidate and add it to the solution list, or drop it with a
/// trace when it cannot support a fit.
fn push_refined(
    mut candidate: StarMatchList,
    nsigmas: f64,
    solutions: &mut Vec<StarMatchList>,
) {
    match candidate.refine(nsigmas) {
        Ok(()) => solutions.push(candidate),
        Err(e) => debug!("dropping candidate of {} pairs: {e}", candidate.len()),
    }
}

/// Pick the best refined solution, or report why there is none.
fn best_solution(
    mut solutions: Vec<StarMatchList>,
    cond: &MatchConditions,
) -> Result<StarMatchList, MatchError> {
    if solutions.is_empty() {
        error!(
            "not a single pair match; the relative list scale is probably outside [{}, {}]",
            cond.min_size_ratio(),
            cond.max_size_ratio()
        );
        return Err(MatchError::NoPairMatch(
            cond.min_size_ratio(),
            cond.max_size_ratio(),
        ));
    }
    solutions.sort_by(compare_quality);
    let best = solutions.swap_remove(0);
    if cond.print_level >= 1 {
        debug!(
            "best solution: residual {:.4}, {} pairs, chi2 {:.4}, {} runners-up",
            best.residual(),
            best.len(),
            best.chi2(),
            solutions.len()
        );
    }
    Ok(best)
}

// ── Variant A: nested dense histograms ──────────────────────────────────────

/// Search with a dense 2-D ratio/angle vote followed by a dense 2-D rank
/// vote inside each ratio/angle peak.
fn rot_shift_ratio_angle(
    l1: &BaseStarList,
    l2: &BaseStarList,
    tin: &Transfo,
    cond: &MatchConditions,
) -> Result<StarMatchList, MatchError> {
    let s1 = segment_list(l1, cond.nstars_l1, tin);
    let s2 = segment_list(l2, cond.nstars_l2, &Transfo::Identity);

    let offset = angle_offset();
    let min_ratio = cond.min_size_ratio();
    let max_ratio = cond.max_size_ratio();
    let mut histo = Histo2d::new(
        N_BINS_RATIO,
        min_ratio,
        max_ratio,
        N_BINS_ANGLE,
        -PI - offset,
        PI - offset,
    );

    for seg1 in &s1 {
        if seg1.r == 0.0 {
            continue;
        }
        for seg2 in &s2 {
            let ratio = seg2.r / seg1.r;
            if ratio > max_ratio {
                continue;
            }
            if ratio < min_ratio {
                // Segment lists are sorted by decreasing length.
                break;
            }
            let mut angle = seg1.relative_angle(seg2);
            if angle > PI - offset {
                angle -= 2.0 * PI;
            }
            histo.fill(ratio, angle);
        }
    }

    let (bin_ratio, bin_angle) = histo.bin_width();
    let mut solutions = Vec::new();

    for _ in 0..cond.max_trial_count {
        let (content, ratio_peak, angle_peak) = histo.max_bin();
        histo.zero_bin(ratio_peak, angle_peak);
        if cond.print_level >= 1 {
            debug!(
                "peak content {content} at ratio {ratio_peak:.4}, angle {angle_peak:.4}"
            );
        }
        let (lo_ratio, hi_ratio) = (ratio_peak - bin_ratio / 2.0, ratio_peak + bin_ratio / 2.0);
        let (lo_angle, hi_angle) = (angle_peak - bin_angle / 2.0, angle_peak + bin_angle / 2.0);

        // Revisit the segment pairs inside this bin and vote on the ranks of
        // their shared first endpoints.
        let mut pair_list: Vec<(&Segment, &Segment)> = Vec::new();
        let mut rank_histo = Histo2d::new(
            cond.nstars_l1,
            0.0,
            cond.nstars_l1 as f64,
            cond.nstars_l2,
            0.0,
            cond.nstars_l2 as f64,
        );
        for seg1 in &s1 {
            if seg1.r == 0.0 {
                continue;
            }
            for seg2 in &s2 {
                let ratio = seg2.r / seg1.r;
                if ratio > hi_ratio {
                    continue;
                }
                if ratio < lo_ratio {
                    break;
                }
                let mut angle = seg1.relative_angle(seg2);
                if angle > PI - offset {
                    angle -= 2.0 * PI;
                }
                if angle < lo_angle || angle > hi_angle {
                    continue;
                }
                pair_list.push((seg1, seg2));
                rank_histo.fill(seg1.s1rank as f64 + 0.5, seg2.s1rank as f64 + 0.5);
            }
        }

        for _ in 0..cond.max_trial_count {
            let (_, rank1, rank2) = rank_histo.max_bin();
            rank_histo.zero_bin(rank1, rank2);
            let candidate = match_list_extract(&pair_list, rank1 as usize, rank2 as usize);
            push_refined(candidate, cond.nsigmas, &mut solutions);
        }
    }

    best_solution(solutions, cond)
}

// ── Variant B: sparse 4-D histogram ─────────────────────────────────────────

/// Search with a single sparse histogram over
/// `(ratio, angle, rank₁, rank₂)`.
fn rot_shift_sparse(
    l1: &BaseStarList,
    l2: &BaseStarList,
    tin: &Transfo,
    cond: &MatchConditions,
) -> Result<StarMatchList, MatchError> {
    let s1 = segment_list(l1, cond.nstars_l1, tin);
    let s2 = segment_list(l2, cond.nstars_l2, &Transfo::Identity);

    let offset = angle_offset();
    let min_ratio = cond.min_size_ratio();
    let max_ratio = cond.max_size_ratio();
    let mut histo = SparseHisto4d::new(
        [
            (N_BINS_RATIO, min_ratio, max_ratio),
            (N_BINS_ANGLE, -PI - offset, PI - offset),
            (cond.nstars_l1, 0.0, cond.nstars_l1 as f64),
            (cond.nstars_l2, 0.0, cond.nstars_l2 as f64),
        ],
        s1.len() * s2.len(),
    );

    for seg1 in &s1 {
        if seg1.r == 0.0 {
            continue;
        }
        for seg2 in &s2 {
            let ratio = seg2.r / seg1.r;
            if ratio > max_ratio {
                continue;
            }
            if ratio < min_ratio {
                break;
            }
            let mut angle = seg1.relative_angle(seg2);
            if angle > PI - offset {
                angle -= 2.0 * PI;
            }
            histo.fill([
                ratio,
                angle,
                seg1.s1rank as f64 + 0.5,
                seg2.s1rank as f64 + 0.5,
            ]);
        }
    }

    let mut solutions = Vec::new();
    let mut previous_peak = 0usize;

    // Bounded sweep over peaks; equal-count bins surface in code order, so
    // once content drops below the previous peak after the requested depth
    // there is nothing better left.
    for trial in 0..4 * cond.max_trial_count {
        let Some((content, peak)) = histo.max_bin() else {
            break;
        };
        if cond.print_level >= 1 {
            debug!(
                "peak content {content} at ratio {:.4}, angle {:.4}",
                peak[0], peak[1]
            );
        }
        histo.zero_bin(&peak);
        if trial > 0 && content < previous_peak && trial >= cond.max_trial_count {
            break;
        }
        previous_peak = content;

        let rank1 = peak[2] as usize;
        let rank2 = peak[3] as usize;
        let (lo_ratio, hi_ratio) = histo.bin_limits(&peak, 0);
        let (lo_angle, hi_angle) = histo.bin_limits(&peak, 1);

        // Re-walk only the segments anchored at the peak ranks; far cheaper
        // than the full voting loop.
        let mut candidate = StarMatchList::new();
        for seg1 in &s1 {
            if seg1.s1rank != rank1 || seg1.r == 0.0 {
                continue;
            }
            for seg2 in &s2 {
                if seg2.s1rank != rank2 {
                    continue;
                }
                if candidate.is_empty() {
                    candidate.push(StarMatch::new(
                        seg1.s1.fat_point(),
                        seg2.s1.fat_point(),
                        seg1.s1.clone(),
                        seg2.s1.clone(),
                    ));
                }
                let ratio = seg2.r / seg1.r;
                if ratio > hi_ratio {
                    continue;
                }
                if ratio < lo_ratio {
                    break;
                }
                let mut angle = seg1.relative_angle(seg2);
                if angle > PI - offset {
                    angle -= 2.0 * PI;
                }
                if angle < lo_angle || angle > hi_angle {
                    continue;
                }
                candidate.push(StarMatch::new(
                    seg1.s2.fat_point(),
                    seg2.s2.fat_point(),
                    seg1.s2.clone(),
                    seg2.s2.clone(),
                ));
            }
        }

        if candidate.len() != content + 1 {
            error!(
                "internal inconsistency in the sparse rotation/shift search: \
                 peak content {content}, extracted {} matches",
                candidate.len()
            );
        }
        push_refined(candidate, cond.nsigmas, &mut solutions);
    }

    best_solution(solutions, cond)
}

// ── Dispatch and public entry points ────────────────────────────────────────

fn rot_shift(
    l1: &BaseStarList,
    l2: &BaseStarList,
    tin: &Transfo,
    cond: &MatchConditions,
) -> Result<StarMatchList, MatchError> {
    if l1.len() <= 4 || l2.len() <= 4 {
        error!(
            "at least one list is too short for combinatorial matching ({} and {} stars)",
            l1.len(),
            l2.len()
        );
        return Err(MatchError::InsufficientPoints(l1.len(), l2.len()));
    }
    match cond.algorithm {
        Algorithm::RatioAngleHisto => rot_shift_ratio_angle(l1, l2, tin, cond),
        Algorithm::SparseFourD => rot_shift_sparse(l1, l2, tin, cond),
    }
}

/// Search for a rotation/scale/shift transformation from `l1` to `l2`.
///
/// The inputs are not modified; flux-sorted working copies are made
/// internally. Returns the best correspondence set with its fitted linear
/// transformation.
pub fn match_search_rot_shift(
    l1: &BaseStarList,
    l2: &BaseStarList,
    cond: &MatchConditions,
) -> Result<StarMatchList, MatchError> {
    cond.validate()?;
    let mut l1 = l1.deep_copy();
    let mut l2 = l2.deep_copy();
    l1.flux_sort();
    l2.flux_sort();
    rot_shift(&l1, &l2, &Transfo::Identity, cond)
}

/// Like [`match_search_rot_shift`], additionally trying an x-axis flip of
/// the first list, and keeping whichever orientation matches better.
///
/// The flip is never applied to the returned match coordinates; a mirrored
/// field shows up as a negative determinant of the fitted transformation.
pub fn match_search_rot_shift_flip(
    l1: &BaseStarList,
    l2: &BaseStarList,
    cond: &MatchConditions,
) -> Result<StarMatchList, MatchError> {
    cond.validate()?;
    let mut l1 = l1.deep_copy();
    let mut l2 = l2.deep_copy();
    l1.flux_sort();
    l2.flux_sort();

    let flip = Transfo::Linear(LinearTransfo::flip_x_axis());
    let flipped = rot_shift(&l1, &l2, &flip, cond);
    let unflipped = rot_shift(&l1, &l2, &Transfo::Identity, cond);

    match (flipped, unflipped) {
        (Ok(f), Ok(u)) => {
            if cond.print_level >= 1 {
                debug!(
                    "unflipped: residual {:.4}, {} pairs; flipped: residual {:.4}, {} pairs",
                    u.residual(),
                    u.len(),
                    f.residual(),
                    f.len()
                );
            }
            if compare_quality(&f, &u) == std::cmp::Ordering::Less {
                info!("keeping the flipped solution ({} pairs)", f.len());
                Ok(f)
            } else {
                info!("keeping the unflipped solution ({} pairs)", u.len());
                Ok(u)
            }
        }
        (Ok(f), Err(e)) => {
            debug!("unflipped search failed ({e}); keeping the flipped solution");
            Ok(f)
        }
        (Err(e), Ok(u)) => {
            debug!("flipped search failed ({e}); keeping the unflipped solution");
            Ok(u)
        }
        (Err(e), Err(_)) => Err(e),
    }
}
