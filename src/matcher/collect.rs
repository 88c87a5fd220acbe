//! Correspondence collection under a transformation guess.
//!
//! Collection never fits anything: it applies the guess to every source
//! star, asks the spatial index for the closest destination star within the
//! tolerance, and records what it finds. The guess rides along as the
//! associated transformation of the produced list.

use crate::finder::StarIndex;
use crate::matches::{StarMatch, StarMatchList};
use crate::star::BaseStarList;
use crate::transfo::Transfo;

/// Collect the closest-neighbour correspondences between `guess`-transformed
/// `l1` and `l2`, keeping pairs closer than `max_dist`.
///
/// The stored source coordinates are the *original* ones; the guess is used
/// only to query the index and to compute each pair's distance.
pub fn list_match_collect(
    l1: &BaseStarList,
    l2: &BaseStarList,
    guess: &Transfo,
    max_dist: f64,
) -> StarMatchList {
    let finder = StarIndex::new(l2);
    let mut matches = StarMatchList::with_transfo(guess.clone());
    for s1 in l1.iter() {
        let p2 = guess.apply(s1.point());
        let Some(neighbour) = finder.closest(p2, max_dist) else {
            continue;
        };
        let distance = p2.distance(neighbour.point());
        if distance < max_dist {
            let mut m = StarMatch::new(
                s1.fat_point(),
                neighbour.fat_point(),
                s1.clone(),
                neighbour.clone(),
            );
            m.distance = distance;
            matches.push(m);
        }
    }
    matches
}

/// [`list_match_collect`] with the identity guess: plain nearest-neighbour
/// association in a shared frame.
pub fn list_match_collect_identity(
    l1: &BaseStarList,
    l2: &BaseStarList,
    max_dist: f64,
) -> StarMatchList {
    list_match_collect(l1, l2, &Transfo::Identity, max_dist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::star::BaseStar;
    use crate::transfo::LinearTransfo;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_list(n: usize, seed: u64) -> BaseStarList {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|i| {
                BaseStar::new(
                    rng.random::<f64>() * 300.0,
                    rng.random::<f64>() * 300.0,
                    i as f64,
                )
            })
            .collect()
    }

    #[test]
    fn test_collect_under_known_transfo() {
        let l1 = random_list(50, 41);
        let t = Transfo::Linear(LinearTransfo::rotation(0.2).compose(
            &LinearTransfo::translation(10.0, -5.0),
        ));
        let l2: BaseStarList = l1
            .iter()
            .map(|s| {
                let q = t.apply(s.point());
                BaseStar::new(q.x, q.y, s.flux)
            })
            .collect();

        let matches = list_match_collect(&l1, &l2, &t, 0.5);
        assert_eq!(matches.len(), 50);
        assert!(matches.iter().all(|m| m.distance < 1e-9));
        // Source coordinates are stored untransformed.
        for (m, s1) in matches.iter().zip(l1.iter()) {
            assert_eq!(m.point1.point(), s1.point());
        }
        assert_eq!(matches.transfo(), &t);
    }

    #[test]
    fn test_collect_respects_tolerance() {
        let l1: BaseStarList = [BaseStar::new(0.0, 0.0, 1.0)].into_iter().collect();
        let l2: BaseStarList = [BaseStar::new(3.0, 0.0, 1.0)].into_iter().collect();
        assert!(list_match_collect_identity(&l1, &l2, 2.0).is_empty());
        assert_eq!(list_match_collect_identity(&l1, &l2, 4.0).len(), 1);
    }

    #[test]
    fn test_collect_is_idempotent() {
        let l1 = random_list(80, 42);
        let l2 = random_list(80, 43);
        let guess = Transfo::shift(2.0, 2.0);

        let a = list_match_collect(&l1, &l2, &guess, 25.0);
        let b = list_match_collect(&l1, &l2, &guess, 25.0);
        assert_eq!(a.len(), b.len());
        for (ma, mb) in a.iter().zip(b.iter()) {
            assert_eq!(ma.point1.point(), mb.point1.point());
            assert_eq!(ma.point2.point(), mb.point2.point());
            assert_eq!(ma.distance, mb.distance);
        }
    }
}
