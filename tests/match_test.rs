//! End-to-end matching scenarios: synthetic truth transformations applied to
//! random star fields, recovered by the combinatorial and shift searches,
//! and checked against the known parameters.

use approx::assert_abs_diff_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use starmatch::{
    list_match_collect, list_match_combinatorial, list_match_refine, list_matchup_shift,
    match_search_rot_shift_flip, BaseStar, BaseStarList, LinearTransfo, MatchConditions, Transfo,
};

// ── Helpers ─────────────────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
}

/// Uniform random field in `[0, span]²`, fluxes strictly decreasing so flux
/// rank is unambiguous.
fn random_field(n: usize, span: f64, seed: u64) -> BaseStarList {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            BaseStar::new(
                rng.random::<f64>() * span,
                rng.random::<f64>() * span,
                10_000.0 - i as f64,
            )
        })
        .collect()
}

fn transformed(list: &BaseStarList, t: &Transfo) -> BaseStarList {
    list.iter()
        .map(|s| {
            let q = t.apply(s.point());
            BaseStar::new(q.x, q.y, s.flux)
        })
        .collect()
}

fn linear_of(t: &Transfo) -> &LinearTransfo {
    match t {
        Transfo::Linear(l) => l,
        other => panic!("expected a linear transformation, got {other:?}"),
    }
}

// ── Scenario 1: five stars, pure shift ──────────────────────────────────────

#[test]
fn test_five_star_shift() {
    init_tracing();
    let l1: BaseStarList = [
        (0.0, 0.0),
        (10.0, 0.0),
        (0.0, 10.0),
        (10.0, 10.0),
        (5.0, 5.0),
    ]
    .iter()
    .enumerate()
    .map(|(i, &(x, y))| BaseStar::new(x, y, 100.0 - i as f64))
    .collect();
    let l2 = transformed(&l1, &Transfo::shift(3.0, -2.0));

    let t = list_matchup_shift(&l1, &l2, &Transfo::Identity, 50.0, 0.0).unwrap();
    assert!((t.dx - 3.0).abs() < 1.0, "dx = {}", t.dx);
    assert!((t.dy + 2.0).abs() < 1.0, "dy = {}", t.dy);

    let matches = list_match_collect(&l1, &l2, &Transfo::Linear(t), 0.1);
    assert_eq!(matches.len(), 5);
}

// ── Scenario 2: rotation by 30° ─────────────────────────────────────────────

#[test]
fn test_rotation_30_degrees_all_matched() {
    init_tracing();
    let l1 = random_field(50, 1000.0, 101);
    let truth = Transfo::Linear(LinearTransfo::rotation(30f64.to_radians()));
    let l2 = transformed(&l1, &truth);

    let t = list_match_combinatorial(&l1, &l2, &MatchConditions::default()).unwrap();
    let lin = linear_of(&t);
    assert_abs_diff_eq!(lin.determinant(), 1.0, epsilon = 0.01);
    assert_abs_diff_eq!(lin.rotation_angle().to_degrees(), 30.0, epsilon = 2.0);

    let matches = list_match_collect(&l1, &l2, &t, 0.1);
    assert_eq!(matches.len(), 50, "every star should be matched");
}

// ── Scenario 3: scale 1.5 then rotate 90° ───────────────────────────────────

#[test]
fn test_scale_and_quarter_turn() {
    init_tracing();
    let l1 = random_field(50, 1000.0, 102);
    let truth = Transfo::Linear(
        LinearTransfo::rotation(90f64.to_radians()).compose(&LinearTransfo::scaling(1.5)),
    );
    let l2 = transformed(&l1, &truth);

    let cond = MatchConditions {
        size_ratio: 1.5,
        ..Default::default()
    };
    let t = list_match_combinatorial(&l1, &l2, &cond).unwrap();
    let lin = linear_of(&t);
    // det = scale² for a rotation+scaling.
    assert_abs_diff_eq!(lin.determinant(), 2.25, epsilon = 0.05);
    assert_abs_diff_eq!(lin.rotation_angle().to_degrees(), 90.0, epsilon = 2.0);
}

// ── Scenario 4: rotation plus outliers ──────────────────────────────────────

#[test]
fn test_outlier_robustness() {
    init_tracing();
    let l1 = random_field(50, 1000.0, 103);
    let truth = Transfo::Linear(LinearTransfo::rotation(30f64.to_radians()));
    let mut l2 = transformed(&l1, &truth);

    // Ten faint spurious detections appended to the destination list.
    let mut rng = StdRng::seed_from_u64(104);
    for i in 0..10 {
        l2.push(BaseStar::new(
            rng.random::<f64>() * 1000.0,
            rng.random::<f64>() * 1000.0,
            100.0 - i as f64,
        ));
    }

    let cond = MatchConditions::default();
    let t = list_match_combinatorial(&l1, &l2, &cond).unwrap();
    let matches = list_match_collect(&l1, &l2, &t, 1.0);
    assert!(matches.len() >= 40, "only {} inliers recovered", matches.len());

    let floor = (l1.len().min(l2.len()) as f64 * cond.min_match_ratio) as usize;
    assert!(matches.len() >= floor);
}

// ── Scenario 5: mirrored field ──────────────────────────────────────────────

#[test]
fn test_mirror_plus_rotation_detected_as_flip() {
    init_tracing();
    let l1 = random_field(50, 1000.0, 105);
    let mirrored = Transfo::Linear(
        LinearTransfo::rotation(45f64.to_radians()).compose(&LinearTransfo::flip_x_axis()),
    );
    let l2 = transformed(&l1, &mirrored);

    let m = match_search_rot_shift_flip(&l1, &l2, &MatchConditions::default()).unwrap();
    assert!(
        m.transfo().determinant().unwrap() < 0.0,
        "a mirrored field must fit with a negative determinant"
    );
    // 45° sits on an angle-bin edge, so the vote may split between two bins;
    // the flipped candidate still has to dominate the unflipped one.
    assert!(m.len() >= 15, "only {} pairs", m.len());
}

// ── Scenario 6: polynomial refinement ───────────────────────────────────────

#[test]
fn test_refine_no_worse_than_linear_start() {
    init_tracing();
    let l1 = random_field(50, 1000.0, 106);
    let truth = Transfo::Linear(LinearTransfo::rotation(30f64.to_radians()));
    let l2 = transformed(&l1, &truth);

    let start = list_match_combinatorial(&l1, &l2, &MatchConditions::default()).unwrap();
    let refined = list_match_refine(&l1, &l2, start.clone(), 3);

    let residual = |t: &Transfo| -> f64 {
        l1.iter()
            .zip(l2.iter())
            .map(|(a, b)| t.apply(a.point()).dist2(b.point()))
            .sum()
    };
    assert!(
        residual(&refined) <= residual(&start) + 1e-9,
        "refined residual {} vs start {}",
        residual(&refined),
        residual(&start)
    );
}

// ── Property: identity recovery ─────────────────────────────────────────────

#[test]
fn test_identity_recovery() {
    init_tracing();
    let field = random_field(20, 1000.0, 107);
    let t = list_match_combinatorial(&field, &field, &MatchConditions::default()).unwrap();
    for s in field.iter() {
        assert!(
            t.apply(s.point()).distance(s.point()) < 1e-6,
            "identity not recovered at ({}, {})",
            s.x,
            s.y
        );
    }
}

// ── Property: rotation recovery across the quadrants ────────────────────────

#[test]
fn test_rotation_recovery_grid() {
    init_tracing();
    for (i, angle_deg) in [30.0f64, 45.0, 90.0, 135.0].into_iter().enumerate() {
        let l1 = random_field(50, 1000.0, 110 + i as u64);
        let truth = Transfo::Linear(LinearTransfo::rotation(angle_deg.to_radians()));
        let l2 = transformed(&l1, &truth);

        let t = list_match_combinatorial(&l1, &l2, &MatchConditions::default()).unwrap();
        let lin = linear_of(&t);
        assert!(
            (lin.determinant() - 1.0).abs() < 0.01,
            "{angle_deg}°: det = {}",
            lin.determinant()
        );
        assert!(
            (lin.rotation_angle().to_degrees() - angle_deg).abs() < 2.0,
            "{angle_deg}°: angle = {}",
            lin.rotation_angle().to_degrees()
        );
    }
}

// ── Property: pure translation within one bin ───────────────────────────────

#[test]
fn test_translation_within_bin_width() {
    init_tracing();
    let max_shift = 50.0;
    let (dx, dy) = (17.0, -21.5); // both under max_shift / 2
    let l1 = random_field(80, 800.0, 120);
    let l2 = transformed(&l1, &Transfo::shift(dx, dy));

    let t = list_matchup_shift(&l1, &l2, &Transfo::Identity, max_shift, 0.0).unwrap();
    // 80·80 pairs → ⌈√6400⌉ = 100 bins over ±50: one bin is 1 pixel wide.
    let bin = 2.0 * max_shift / 100.0;
    assert!((t.dx - dx).abs() < bin, "dx = {}", t.dx);
    assert!((t.dy - dy).abs() < bin, "dy = {}", t.dy);
}

// ── Property: rotation recovery under centroiding noise ─────────────────────

#[test]
fn test_rotation_with_centroid_noise() {
    init_tracing();
    let l1 = random_field(50, 1000.0, 115);
    let truth = Transfo::Linear(LinearTransfo::rotation(30f64.to_radians()));
    let noise = Normal::new(0.0, 0.1).unwrap();
    let mut rng = StdRng::seed_from_u64(116);
    let l2: BaseStarList = l1
        .iter()
        .map(|s| {
            let q = truth.apply(s.point());
            BaseStar::new(
                q.x + noise.sample(&mut rng),
                q.y + noise.sample(&mut rng),
                s.flux,
            )
        })
        .collect();

    let t = list_match_combinatorial(&l1, &l2, &MatchConditions::default()).unwrap();
    let lin = linear_of(&t);
    assert!((lin.determinant() - 1.0).abs() < 0.01);
    assert!((lin.rotation_angle().to_degrees() - 30.0).abs() < 2.0);

    let matches = list_match_collect(&l1, &l2, &t, 1.0);
    assert!(matches.len() >= 45, "only {} pairs under noise", matches.len());
}

// ── Property: collection is idempotent ──────────────────────────────────────

#[test]
fn test_collection_idempotent() {
    init_tracing();
    let l1 = random_field(60, 500.0, 121);
    let l2 = random_field(60, 500.0, 122);
    let guess = Transfo::Linear(LinearTransfo::rotation(0.1));

    let a = list_match_collect(&l1, &l2, &guess, 30.0);
    let b = list_match_collect(&l1, &l2, &guess, 30.0);
    assert_eq!(a.len(), b.len());
    for (ma, mb) in a.iter().zip(b.iter()) {
        assert_eq!(ma.point1.point(), mb.point1.point());
        assert_eq!(ma.point2.point(), mb.point2.point());
        assert_eq!(ma.distance, mb.distance);
    }
}

// ── Property: determinism ───────────────────────────────────────────────────

#[test]
fn test_determinism() {
    init_tracing();
    let l1 = random_field(40, 1000.0, 123);
    let truth = Transfo::Linear(LinearTransfo::rotation(0.6));
    let l2 = transformed(&l1, &truth);
    let cond = MatchConditions::default();

    let first = match_search_rot_shift_flip(&l1, &l2, &cond).unwrap();
    let second = match_search_rot_shift_flip(&l1, &l2, &cond).unwrap();

    assert_eq!(first.len(), second.len());
    assert_eq!(first.transfo(), second.transfo());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.point1.point(), b.point1.point());
        assert_eq!(a.point2.point(), b.point2.point());
    }
}

// ── Failure surfaces ────────────────────────────────────────────────────────

#[test]
fn test_failures_are_reported() {
    init_tracing();
    // Degenerate input.
    let tiny = random_field(3, 100.0, 130);
    assert!(list_match_combinatorial(&tiny, &tiny, &MatchConditions::default()).is_err());

    // Invalid configuration.
    let field = random_field(30, 100.0, 131);
    let bad = MatchConditions {
        nsigmas: 0.0,
        ..Default::default()
    };
    assert!(list_match_combinatorial(&field, &field, &bad).is_err());

    // Scale outside the ratio window in both orientations.
    let scaled = transformed(&field, &Transfo::Linear(LinearTransfo::scaling(3.0)));
    assert!(list_match_combinatorial(&field, &scaled, &MatchConditions::default()).is_err());
}
