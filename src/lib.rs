//! Combinatorial matching of planar star lists for astrometric joint calibration.
//!
//! Given two lists of detections in a common planar frame (two images of the
//! same field, or a detection list and a projected reference catalog), this
//! crate discovers the geometric transformation relating them and produces a
//! robust set of point-to-point correspondences. The search copes with
//! outliers, partial overlap, unknown rotation, unknown scale, and a possible
//! axis flip. The algorithm:
//!
//! 1. **Combinatorial search**: segments (ordered pairs of bright stars) from
//!    both lists vote for a relative scale and rotation in a histogram; the
//!    strongest peaks nominate anchor star pairs whose surrounding segment
//!    pairs become candidate correspondence sets.
//! 2. **Candidate refinement**: each candidate is fit with a linear
//!    transformation and sigma-clipped; candidates are ranked by match count,
//!    ties broken by summed squared residuals.
//! 3. **Polishing**: [`list_match_refine`] alternates correspondence
//!    collection with fits of increasing polynomial order until the
//!    chi-squared stops improving.
//!
//! The top-level entry points are [`list_match_combinatorial`] (find a linear
//! transformation from scratch) and [`list_match_refine`] (polish it). The
//! lower-level searches ([`match_search_rot_shift`],
//! [`match_search_rot_shift_flip`], [`list_matchup_shift`],
//! [`list_match_collect`]) are exposed for callers that already hold a guess.

pub mod finder;
pub mod histogram;
pub mod matcher;
pub mod matches;
pub mod star;
pub mod transfo;

pub use finder::StarIndex;
pub use histogram::{Histo2d, SparseHisto4d};
pub use matcher::collect::{list_match_collect, list_match_collect_identity};
pub use matcher::refine::{list_match_combinatorial, list_match_refine};
pub use matcher::rotshift::{match_search_rot_shift, match_search_rot_shift_flip};
pub use matcher::shift::list_matchup_shift;
pub use matcher::{Algorithm, MatchConditions, MatchError};
pub use matches::{StarMatch, StarMatchList};
pub use star::{BaseStar, BaseStarList, FatPoint, Point};
pub use transfo::{LinearTransfo, PolyTransfo, ShiftTransfo, Transfo};
