//! Segments: the pair invariant driving the combinatorial vote.

use std::rc::Rc;

use crate::star::{BaseStar, BaseStarList};
use crate::transfo::Transfo;

/// An ordered pair of stars from the same list, reduced to its matching
/// invariants: the endpoint vector, its length, and the flux rank of the
/// first endpoint.
#[derive(Debug, Clone)]
pub struct Segment {
    pub dx: f64,
    pub dy: f64,
    pub r: f64,
    /// Rank of the first endpoint in the flux-sorted list (brightest = 0).
    pub s1rank: usize,
    pub s1: Rc<BaseStar>,
    pub s2: Rc<BaseStar>,
}

impl Segment {
    fn new(s1: &Rc<BaseStar>, s2: &Rc<BaseStar>, s1rank: usize, tin: &Transfo) -> Self {
        let p1 = tin.apply(s1.point());
        let p2 = tin.apply(s2.point());
        let dx = p2.x - p1.x;
        let dy = p2.y - p1.y;
        Self {
            dx,
            dy,
            r: (dx * dx + dy * dy).sqrt(),
            s1rank,
            s1: Rc::clone(s1),
            s2: Rc::clone(s2),
        }
    }

    /// Angle from this segment to `other`, treating both as complex numbers:
    /// `arg(other / self)`, in `(−π, π]`.
    pub fn relative_angle(&self, other: &Segment) -> f64 {
        (self.dx * other.dy - self.dy * other.dx).atan2(self.dx * other.dx + self.dy * other.dy)
    }
}

/// Build all segments over the `nstars` brightest stars of a flux-sorted
/// list, with `tin` applied to both endpoints first.
///
/// All ordered pairs `(i, j)` with `i < j` are produced, then sorted by
/// decreasing length so the voting loops can `break` as soon as the
/// length-ratio lower bound is violated.
pub fn segment_list(list: &BaseStarList, nstars: usize, tin: &Transfo) -> Vec<Segment> {
    let limit = nstars.min(list.len());
    let mut segments = Vec::with_capacity(limit.saturating_sub(1) * limit / 2);
    for i in 0..limit {
        let s1 = list.get(i).unwrap();
        for j in (i + 1)..limit {
            segments.push(Segment::new(s1, list.get(j).unwrap(), i, tin));
        }
    }
    segments.sort_by(|a, b| b.r.partial_cmp(&a.r).unwrap_or(std::cmp::Ordering::Equal));
    segments
}
