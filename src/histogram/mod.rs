//! Voting histograms for the combinatorial searches.
//!
//! Two flavours back the two algorithm variants:
//!
//! - [`Histo2d`] — a dense 2-D histogram over `Vec<f64>`, used for the
//!   ratio/angle vote, the rank vote, and the translation vote.
//! - [`SparseHisto4d`] — a sparse 4-D histogram storing one bit-packed bin
//!   code per fill, used for the joint
//!   `(ratio, angle, rank₁, rank₂)` vote where a dense array would be
//!   enormous and almost entirely empty.
//!
//! Both expose the same peak-investigation surface: fill, locate the maximum
//! bin, zero it, and query bin geometry. Histograms are scoped to a single
//! search; nothing here persists.

pub mod dense;
pub mod sparse;

pub use dense::Histo2d;
pub use sparse::SparseHisto4d;
