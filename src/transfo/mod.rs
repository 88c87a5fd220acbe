//! Planar transformations between star-list frames.
//!
//! [`Transfo`] is the transformation the matcher searches for, fits, and
//! hands back to callers. Four variants (identity, pure translation, full
//! flip-capable affine, and bivariate polynomial of arbitrary order) sit
//! behind one enum-dispatched surface: apply, apply with error propagation,
//! Jacobian, composition, inversion, parameter count.
//!
//! Fitting a transformation to a correspondence set lives in [`fit`]; the
//! order a fit should target is carried by the match list that owns the
//! correspondences.

pub mod fit;
pub mod linear;
pub mod poly;

pub use linear::LinearTransfo;
pub use poly::PolyTransfo;

use crate::star::{FatPoint, Point};

// ── Shift ───────────────────────────────────────────────────────────────────

/// A pure translation, 2 parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShiftTransfo {
    pub dx: f64,
    pub dy: f64,
}

impl ShiftTransfo {
    pub fn new(dx: f64, dy: f64) -> Self {
        Self { dx, dy }
    }

    pub fn apply(&self, p: Point) -> Point {
        Point::new(p.x + self.dx, p.y + self.dy)
    }
}

// ── The transformation sum type ─────────────────────────────────────────────

/// A planar transformation.
#[derive(Debug, Clone, PartialEq)]
pub enum Transfo {
    /// The identity map.
    Identity,
    /// Pure translation.
    Shift(ShiftTransfo),
    /// Full affine map; a negative determinant encodes an axis flip.
    Linear(LinearTransfo),
    /// Bivariate polynomial of order ≥ 1.
    Poly(PolyTransfo),
}

impl Transfo {
    /// Convenience constructor for a pure translation.
    pub fn shift(dx: f64, dy: f64) -> Transfo {
        Transfo::Shift(ShiftTransfo::new(dx, dy))
    }

    /// Transform a point.
    pub fn apply(&self, p: Point) -> Point {
        match self {
            Transfo::Identity => p,
            Transfo::Shift(s) => s.apply(p),
            Transfo::Linear(l) => l.apply(p),
            Transfo::Poly(t) => t.apply(p),
        }
    }

    /// Jacobian matrix `[[∂x'/∂x, ∂x'/∂y], [∂y'/∂x, ∂y'/∂y]]` at `p`.
    pub fn jacobian(&self, p: Point) -> [[f64; 2]; 2] {
        match self {
            Transfo::Identity | Transfo::Shift(_) => [[1.0, 0.0], [0.0, 1.0]],
            Transfo::Linear(l) => [[l.a11, l.a12], [l.a21, l.a22]],
            Transfo::Poly(t) => t.jacobian(p),
        }
    }

    /// Transform a point and propagate its error ellipse to first order:
    /// `V' = J·V·Jᵀ` with `J` the Jacobian at the point.
    pub fn apply_with_errors(&self, p: &FatPoint) -> FatPoint {
        let q = self.apply(p.point());
        let [[j11, j12], [j21, j22]] = self.jacobian(p.point());
        FatPoint::with_errors(
            q.x,
            q.y,
            j11 * j11 * p.vx + 2.0 * j11 * j12 * p.vxy + j12 * j12 * p.vy,
            j21 * j21 * p.vx + 2.0 * j21 * j22 * p.vxy + j22 * j22 * p.vy,
            j11 * j21 * p.vx + (j11 * j22 + j12 * j21) * p.vxy + j12 * j22 * p.vy,
        )
    }

    /// Composition `self ∘ inner`: the result applies `inner` first, then
    /// `self`. Affine combinations compose exactly at affine order;
    /// polynomial combinations compose by substitution.
    pub fn compose(&self, inner: &Transfo) -> Transfo {
        match (self, inner) {
            (Transfo::Identity, t) => t.clone(),
            (t, Transfo::Identity) => t.clone(),
            (Transfo::Shift(s), t) => t.clone().translated(s.dx, s.dy),
            (Transfo::Linear(a), Transfo::Shift(s)) => Transfo::Linear(
                a.compose(&LinearTransfo::translation(s.dx, s.dy)),
            ),
            (Transfo::Linear(a), Transfo::Linear(b)) => Transfo::Linear(a.compose(b)),
            (Transfo::Linear(a), Transfo::Poly(p)) => {
                // Affine-after-polynomial is a coefficient-wise combination.
                Transfo::Poly(p.affine_outer(a))
            }
            (Transfo::Poly(p), t) => {
                Transfo::Poly(p.substitute(&PolyTransfo::of_transfo(t)))
            }
        }
    }

    /// Translate the *output* of the transformation by `(dx, dy)`.
    fn translated(self, dx: f64, dy: f64) -> Transfo {
        match self {
            Transfo::Identity => Transfo::shift(dx, dy),
            Transfo::Shift(s) => Transfo::shift(s.dx + dx, s.dy + dy),
            Transfo::Linear(mut l) => {
                l.dx += dx;
                l.dy += dy;
                Transfo::Linear(l)
            }
            Transfo::Poly(mut p) => {
                p.ax[0] += dx;
                p.ay[0] += dy;
                Transfo::Poly(p)
            }
        }
    }

    /// Closed-form inverse.
    ///
    /// `None` for a singular linear map and for polynomials, which have no
    /// closed-form inverse; invert a polynomial solution by refitting
    /// swapped correspondences
    /// ([`StarMatchList::inverse_transfo`](crate::StarMatchList::inverse_transfo)).
    pub fn inverse(&self) -> Option<Transfo> {
        match self {
            Transfo::Identity => Some(Transfo::Identity),
            Transfo::Shift(s) => Some(Transfo::shift(-s.dx, -s.dy)),
            Transfo::Linear(l) => l.inverse().map(Transfo::Linear),
            Transfo::Poly(_) => None,
        }
    }

    /// Number of free parameters of this variant.
    pub fn npar(&self) -> usize {
        match self {
            Transfo::Identity => 0,
            Transfo::Shift(_) => 2,
            Transfo::Linear(_) => 6,
            Transfo::Poly(p) => p.npar(),
        }
    }

    /// Determinant of the linear part, where the variant has one.
    ///
    /// Identity and shifts are volume-preserving (determinant 1); general
    /// polynomials have no global determinant and yield `None`.
    pub fn determinant(&self) -> Option<f64> {
        match self {
            Transfo::Identity | Transfo::Shift(_) => Some(1.0),
            Transfo::Linear(l) => Some(l.determinant()),
            Transfo::Poly(_) => None,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
