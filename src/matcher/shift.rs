//! Translation-only search.
//!
//! When rotation and scale are already known (from a previous exposure or a
//! combinatorial solve) and only the pointing offset is uncertain, voting on
//! translation vectors is far cheaper than the full combinatorial search:
//! every (source, neighbour) pair within the shift bound casts one vote at
//! its coordinate difference.

use tracing::debug;

use crate::finder::StarIndex;
use crate::histogram::Histo2d;
use crate::matcher::collect::list_match_collect;
use crate::matcher::{compare_quality, MatchError};
use crate::matches::StarMatchList;
use crate::star::BaseStarList;
use crate::transfo::{LinearTransfo, Transfo};

/// Peaks investigated in the translation vote.
const N_PEAKS: usize = 4;

/// Search for the translation relating `tin`-transformed `l1` to `l2`.
///
/// Votes `(Δx, Δy)` for every pair within `max_shift`, investigates the four
/// strongest peaks, and refits each as a full linear transformation at 3σ.
/// With `bin_size == 0` the histogram uses
/// `max(⌈√(|l1|·|l2|)⌉, 100)` bins per axis over `[−max_shift, max_shift]`;
/// a positive `bin_size` fixes the bin width instead.
///
/// The returned transformation maps `tin`-transformed source coordinates to
/// destination coordinates, so the full map of a raw source point is the
/// composition of the result with `tin`.
pub fn list_matchup_shift(
    l1: &BaseStarList,
    l2: &BaseStarList,
    tin: &Transfo,
    max_shift: f64,
    bin_size: f64,
) -> Result<LinearTransfo, MatchError> {
    if l1.is_empty() || l2.is_empty() {
        return Err(MatchError::InsufficientPoints(l1.len(), l2.len()));
    }
    let nbins = if bin_size == 0.0 {
        let ncomb = l1.len() * l2.len();
        ((ncomb as f64).sqrt().ceil() as usize).max(100)
    } else {
        (2.0 * max_shift / bin_size + 0.5) as usize
    };
    if nbins == 0 {
        return Err(MatchError::InvalidConditions(format!(
            "bin size {bin_size} leaves no bins across ±{max_shift}"
        )));
    }

    let mut histo = Histo2d::new(nbins, -max_shift, max_shift, nbins, -max_shift, max_shift);
    let (bin_width, _) = histo.bin_width();

    let finder = StarIndex::new(l2);
    for s1 in l1.iter() {
        let p1 = tin.apply(s1.point());
        for s2 in finder.within(p1, max_shift) {
            histo.fill(s2.x - p1.x, s2.y - p1.y);
        }
    }

    let mut solutions: Vec<StarMatchList> = Vec::new();
    for _ in 0..N_PEAKS {
        let (votes, dx, dy) = histo.max_bin();
        histo.zero_bin(dx, dy);
        debug!("shift peak ({dx:.2}, {dy:.2}) with {votes} votes");

        let guess = Transfo::shift(dx, dy).compose(tin);
        let mut matches = list_match_collect(l1, l2, &guess, bin_width);
        // Refit in the frame of the incoming guess: the fitted linear map
        // absorbs the shift and any residual rotation/scale left by `tin`.
        matches.apply_transfo(tin);
        matches.set_order(1);
        match matches.refine(3.0) {
            Ok(()) => solutions.push(matches),
            Err(e) => debug!("dropping shift peak ({dx:.2}, {dy:.2}): {e}"),
        }
    }

    if solutions.is_empty() {
        return Err(MatchError::NoViableSolution);
    }
    solutions.sort_by(compare_quality);
    match solutions.swap_remove(0).transfo() {
        Transfo::Linear(l) => Ok(*l),
        other => Err(MatchError::DegenerateFit(format!(
            "shift refit produced a non-linear transformation: {other:?}"
        ))),
    }
}
