//! Least-squares fitting of a transformation to a correspondence set.
//!
//! The design matrix holds the source-point monomials up to the requested
//! order; the x and y coefficient sets share it as a two-column right-hand
//! side, solved by SVD. Source coordinates are normalized (centered and
//! scaled) before building the system so the monomial columns stay
//! well-conditioned at any image scale; the normalization is folded back
//! into the returned transformation.

use nalgebra::DMatrix;

use crate::matcher::MatchError;
use crate::star::Point;
use crate::transfo::{poly, LinearTransfo, PolyTransfo, ShiftTransfo, Transfo};

/// Relative singular-value floor below which the design is rank-deficient.
const RANK_TOL: f64 = 1e-10;

/// Fit a transformation of the given order to `(source, destination)` pairs.
///
/// Order 0 fits a pure shift, order 1 a full affine map, order ≥ 2 a
/// bivariate polynomial. Fails when the pairs cannot constrain the
/// parameters or the system is degenerate (collinear points, repeated
/// points, a vanishing linear determinant).
pub fn fit_transfo(pairs: &[(Point, Point)], order: usize) -> Result<Transfo, MatchError> {
    let n = pairs.len();

    if order == 0 {
        if n == 0 {
            return Err(MatchError::DegenerateFit(
                "cannot fit a shift to an empty match set".into(),
            ));
        }
        let dx = pairs.iter().map(|(p1, p2)| p2.x - p1.x).sum::<f64>() / n as f64;
        let dy = pairs.iter().map(|(p1, p2)| p2.y - p1.y).sum::<f64>() / n as f64;
        return Ok(Transfo::Shift(ShiftTransfo::new(dx, dy)));
    }

    let ncf = poly::ncoeffs(order);
    if n < ncf {
        return Err(MatchError::DegenerateFit(format!(
            "{n} pairs cannot constrain an order-{order} fit ({} parameters)",
            2 * ncf
        )));
    }

    // Normalize source coordinates: p → (p − center) / scale.
    let cx = pairs.iter().map(|(p1, _)| p1.x).sum::<f64>() / n as f64;
    let cy = pairs.iter().map(|(p1, _)| p1.y).sum::<f64>() / n as f64;
    let scale = pairs
        .iter()
        .map(|(p1, _)| (p1.x - cx).abs().max((p1.y - cy).abs()))
        .fold(0.0f64, f64::max);
    if scale < 1e-12 {
        return Err(MatchError::DegenerateFit(
            "source points are all coincident".into(),
        ));
    }
    let norm = LinearTransfo::new(-cx / scale, -cy / scale, 1.0 / scale, 0.0, 0.0, 1.0 / scale);

    let terms = poly::monomials(order);
    let mut design = DMatrix::<f64>::zeros(n, ncf);
    let mut rhs = DMatrix::<f64>::zeros(n, 2);
    for (row, (p1, p2)) in pairs.iter().enumerate() {
        let q = norm.apply(*p1);
        for (col, &(p, qpow)) in terms.iter().enumerate() {
            design[(row, col)] = q.x.powi(p as i32) * q.y.powi(qpow as i32);
        }
        rhs[(row, 0)] = p2.x;
        rhs[(row, 1)] = p2.y;
    }

    let svd = design.svd(true, true);
    let smax = svd.singular_values.iter().cloned().fold(0.0f64, f64::max);
    let smin = svd
        .singular_values
        .iter()
        .cloned()
        .fold(f64::INFINITY, f64::min);
    if !(smax > 0.0) || smin < RANK_TOL * smax {
        return Err(MatchError::DegenerateFit(
            "rank-deficient design matrix".into(),
        ));
    }
    let coeffs = svd
        .solve(&rhs, 0.0)
        .map_err(|e| MatchError::DegenerateFit(e.into()))?;

    let ax: Vec<f64> = (0..ncf).map(|i| coeffs[(i, 0)]).collect();
    let ay: Vec<f64> = (0..ncf).map(|i| coeffs[(i, 1)]).collect();

    // Fold the normalization back in: fitted = Tn ∘ norm.
    let fitted = if order == 1 {
        let tn = LinearTransfo::new(ax[0], ay[0], ax[1], ax[2], ay[1], ay[2]);
        let full = tn.compose(&norm);
        if full.determinant().abs() < 1e-12 {
            return Err(MatchError::DegenerateFit(
                "fitted linear transformation is singular".into(),
            ));
        }
        Transfo::Linear(full)
    } else {
        let tn = PolyTransfo::new(order, ax, ay);
        Transfo::Poly(tn).compose(&Transfo::Linear(norm))
    };
    Ok(fitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn pairs_under(t: &Transfo, points: &[Point]) -> Vec<(Point, Point)> {
        points.iter().map(|&p| (p, t.apply(p))).collect()
    }

    fn random_points(n: usize, span: f64, seed: u64) -> Vec<Point> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| Point::new(rng.random::<f64>() * span, rng.random::<f64>() * span))
            .collect()
    }

    fn assert_transfo_close(a: &Transfo, b: &Transfo, points: &[Point], tol: f64) {
        for &p in points {
            let qa = a.apply(p);
            let qb = b.apply(p);
            assert!(
                qa.distance(qb) < tol,
                "transformations differ by {} at ({}, {})",
                qa.distance(qb),
                p.x,
                p.y
            );
        }
    }

    #[test]
    fn test_fit_shift() {
        let truth = Transfo::shift(3.0, -2.0);
        let points = random_points(10, 100.0, 1);
        let fitted = fit_transfo(&pairs_under(&truth, &points), 0).unwrap();
        assert_transfo_close(&fitted, &truth, &points, 1e-10);
        assert!(matches!(fitted, Transfo::Shift(_)));
    }

    #[test]
    fn test_fit_linear_recovers_rotation_scale() {
        let truth = Transfo::Linear(
            LinearTransfo::scaling(1.5).compose(&LinearTransfo::rotation(0.5)),
        );
        let points = random_points(20, 1000.0, 2);
        let fitted = fit_transfo(&pairs_under(&truth, &points), 1).unwrap();
        assert_transfo_close(&fitted, &truth, &points, 1e-8);
        match fitted {
            Transfo::Linear(l) => assert!((l.determinant() - 2.25).abs() < 1e-8),
            other => panic!("expected linear fit, got {other:?}"),
        }
    }

    #[test]
    fn test_fit_poly_recovers_quadratic() {
        let mut ax = vec![0.0; poly::ncoeffs(2)];
        let mut ay = vec![0.0; poly::ncoeffs(2)];
        ax[poly::coeff_index(0, 0)] = 5.0;
        ax[poly::coeff_index(1, 0)] = 1.0;
        ax[poly::coeff_index(2, 0)] = 1e-4;
        ay[poly::coeff_index(0, 1)] = 1.0;
        ay[poly::coeff_index(1, 1)] = -2e-4;
        let truth = Transfo::Poly(PolyTransfo::new(2, ax, ay));

        let points = random_points(40, 500.0, 3);
        let fitted = fit_transfo(&pairs_under(&truth, &points), 2).unwrap();
        let probes = random_points(10, 500.0, 4);
        assert_transfo_close(&fitted, &truth, &probes, 1e-6);
    }

    #[test]
    fn test_fit_rejects_too_few_pairs() {
        let pairs = vec![(Point::new(0.0, 0.0), Point::new(1.0, 1.0))];
        assert!(fit_transfo(&pairs, 1).is_err());
    }

    #[test]
    fn test_fit_rejects_collinear_points_for_linear() {
        let points: Vec<Point> = (0..10).map(|i| Point::new(i as f64, 2.0 * i as f64)).collect();
        let pairs: Vec<_> = points.iter().map(|&p| (p, p)).collect();
        assert!(fit_transfo(&pairs, 1).is_err());
    }

    #[test]
    fn test_fit_well_conditioned_at_large_coordinates() {
        // Cubic fit on points thousands of pixels from the origin: the
        // normalization must keep the design matrix solvable.
        let truth = Transfo::Linear(LinearTransfo::rotation(0.3));
        let points = random_points(60, 4000.0, 5);
        let fitted = fit_transfo(&pairs_under(&truth, &points), 3).unwrap();
        assert_transfo_close(&fitted, &truth, &points, 1e-6);
    }
}
