//! Polynomial planar transformation.
//!
//! Each output coordinate is a full bivariate polynomial of the input:
//!
//! ```text
//! x' = Σ ax_pq · x^p · y^q      (0 ≤ p+q ≤ order)
//! y' = Σ ay_pq · x^p · y^q
//! ```
//!
//! Coefficients are stored in flat vectors indexed by [`coeff_index`];
//! monomials are enumerated by increasing total degree, then decreasing
//! power of x:
//!
//! ```text
//! (0,0); (1,0), (0,1); (2,0), (1,1), (0,2); ...
//! ```
//!
//! The index of a monomial depends only on `(p, q)`, never on the polynomial
//! order, so a lower-order coefficient vector is a prefix of a higher-order
//! one. Composition exploits this: products and substitutions accumulate
//! straight into the result vector.

use crate::star::Point;
use crate::transfo::{LinearTransfo, Transfo};

/// Number of monomials with `p + q ≤ order`.
pub fn ncoeffs(order: usize) -> usize {
    (order + 1) * (order + 2) / 2
}

/// Flat index of the `x^p · y^q` monomial.
pub fn coeff_index(p: usize, q: usize) -> usize {
    let s = p + q;
    s * (s + 1) / 2 + (s - p)
}

/// All `(p, q)` pairs with `p + q ≤ order`, in index order.
pub fn monomials(order: usize) -> Vec<(usize, usize)> {
    let mut pairs = Vec::with_capacity(ncoeffs(order));
    for s in 0..=order {
        for p in (0..=s).rev() {
            pairs.push((p, s - p));
        }
    }
    pairs
}

/// Evaluate `Σ coeffs[pq] · x^p · y^q` for all monomials up to `order`.
pub fn eval(coeffs: &[f64], order: usize, x: f64, y: f64) -> f64 {
    let mut result = 0.0;
    let mut idx = 0;
    for s in 0..=order {
        for p in (0..=s).rev() {
            let q = s - p;
            result += coeffs[idx] * x.powi(p as i32) * y.powi(q as i32);
            idx += 1;
        }
    }
    result
}

/// Product of two bivariate polynomials; the result has order `oa + ob`.
fn poly_mul(a: &[f64], oa: usize, b: &[f64], ob: usize) -> Vec<f64> {
    let mut out = vec![0.0; ncoeffs(oa + ob)];
    for (i, &(pa, qa)) in monomials(oa).iter().enumerate() {
        if a[i] == 0.0 {
            continue;
        }
        for (j, &(pb, qb)) in monomials(ob).iter().enumerate() {
            if b[j] == 0.0 {
                continue;
            }
            out[coeff_index(pa + pb, qa + qb)] += a[i] * b[j];
        }
    }
    out
}

/// A polynomial transformation of order ≥ 1.
#[derive(Debug, Clone, PartialEq)]
pub struct PolyTransfo {
    order: usize,
    /// Coefficients of the x output, indexed by [`coeff_index`].
    pub ax: Vec<f64>,
    /// Coefficients of the y output, indexed by [`coeff_index`].
    pub ay: Vec<f64>,
}

impl PolyTransfo {
    /// Create from explicit coefficient vectors.
    ///
    /// Both vectors must hold exactly `ncoeffs(order)` entries.
    pub fn new(order: usize, ax: Vec<f64>, ay: Vec<f64>) -> Self {
        assert!(order >= 1, "polynomial order must be at least 1");
        let n = ncoeffs(order);
        assert_eq!(ax.len(), n, "ax length mismatch");
        assert_eq!(ay.len(), n, "ay length mismatch");
        Self { order, ax, ay }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Total parameter count (both axes).
    pub fn npar(&self) -> usize {
        2 * ncoeffs(self.order)
    }

    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            eval(&self.ax, self.order, p.x, p.y),
            eval(&self.ay, self.order, p.x, p.y),
        )
    }

    /// Analytic Jacobian `[[∂x'/∂x, ∂x'/∂y], [∂y'/∂x, ∂y'/∂y]]` at `p`.
    pub fn jacobian(&self, p: Point) -> [[f64; 2]; 2] {
        let mut j = [[0.0; 2]; 2];
        for (i, &(px, qy)) in monomials(self.order).iter().enumerate() {
            let coeffs = [self.ax[i], self.ay[i]];
            for (row, &c) in coeffs.iter().enumerate() {
                if c == 0.0 {
                    continue;
                }
                if px > 0 {
                    j[row][0] +=
                        c * px as f64 * p.x.powi(px as i32 - 1) * p.y.powi(qy as i32);
                }
                if qy > 0 {
                    j[row][1] +=
                        c * qy as f64 * p.x.powi(px as i32) * p.y.powi(qy as i32 - 1);
                }
            }
        }
        j
    }

    /// Represent any transformation variant as a polynomial (affine variants
    /// become order-1 polynomials).
    pub fn of_transfo(t: &Transfo) -> PolyTransfo {
        match t {
            Transfo::Identity => Self::of_linear(&LinearTransfo::identity()),
            Transfo::Shift(s) => {
                Self::of_linear(&LinearTransfo::translation(s.dx, s.dy))
            }
            Transfo::Linear(l) => Self::of_linear(l),
            Transfo::Poly(p) => p.clone(),
        }
    }

    fn of_linear(l: &LinearTransfo) -> PolyTransfo {
        PolyTransfo::new(
            1,
            vec![l.dx, l.a11, l.a12],
            vec![l.dy, l.a21, l.a22],
        )
    }

    /// Compose with an affine map applied *after* this polynomial:
    /// `result(p) = outer(self(p))`. The order is unchanged.
    pub fn affine_outer(&self, outer: &LinearTransfo) -> PolyTransfo {
        let n = ncoeffs(self.order);
        let mut ax = vec![0.0; n];
        let mut ay = vec![0.0; n];
        for i in 0..n {
            ax[i] = outer.a11 * self.ax[i] + outer.a12 * self.ay[i];
            ay[i] = outer.a21 * self.ax[i] + outer.a22 * self.ay[i];
        }
        ax[0] += outer.dx;
        ay[0] += outer.dy;
        PolyTransfo::new(self.order, ax, ay)
    }

    /// Substitute another polynomial map into this one:
    /// `result(p) = self(inner(p))`. The result has order
    /// `self.order · inner.order`.
    pub fn substitute(&self, inner: &PolyTransfo) -> PolyTransfo {
        let out_order = self.order * inner.order;
        let out_n = ncoeffs(out_order);

        // Powers of the inner component polynomials, built incrementally:
        // pow[k] has order k * inner.order.
        let max_pow = self.order;
        let mut xpows: Vec<Vec<f64>> = Vec::with_capacity(max_pow + 1);
        let mut ypows: Vec<Vec<f64>> = Vec::with_capacity(max_pow + 1);
        xpows.push(vec![1.0]);
        ypows.push(vec![1.0]);
        for k in 1..=max_pow {
            xpows.push(poly_mul(
                &xpows[k - 1],
                (k - 1) * inner.order,
                &inner.ax,
                inner.order,
            ));
            ypows.push(poly_mul(
                &ypows[k - 1],
                (k - 1) * inner.order,
                &inner.ay,
                inner.order,
            ));
        }

        let mut ax = vec![0.0; out_n];
        let mut ay = vec![0.0; out_n];
        for (i, &(p, q)) in monomials(self.order).iter().enumerate() {
            if self.ax[i] == 0.0 && self.ay[i] == 0.0 {
                continue;
            }
            let term = poly_mul(&xpows[p], p * inner.order, &ypows[q], q * inner.order);
            for (t_idx, &t) in term.iter().enumerate() {
                ax[t_idx] += self.ax[i] * t;
                ay[t_idx] += self.ay[i] * t;
            }
        }
        PolyTransfo::new(out_order, ax, ay)
    }
}
