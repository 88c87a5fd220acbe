//! Fast nearest-neighbour queries over a static star list.

use std::rc::Rc;

use kiddo::float::distance::SquaredEuclidean;
use kiddo::float::kdtree::KdTree;

use crate::star::{BaseStar, BaseStarList, Point};

/// A nearest-neighbour index over a snapshot of a [`BaseStarList`].
///
/// The index holds its own star handles, so it stays valid if the source
/// list is dropped. It does not track later mutations of the source list;
/// build it after the list has reached its final content.
pub struct StarIndex {
    tree: KdTree<f64, usize, 2, 32, u32>,
    stars: Vec<Rc<BaseStar>>,
}

impl StarIndex {
    /// Build an index over the current content of `list`.
    pub fn new(list: &BaseStarList) -> Self {
        let mut tree = KdTree::with_capacity(list.len().max(1));
        let mut stars = Vec::with_capacity(list.len());
        for (i, star) in list.iter().enumerate() {
            tree.add(&[star.x, star.y], i);
            stars.push(Rc::clone(star));
        }
        Self { tree, stars }
    }

    /// The closest star to `p` within `max_dist`, if any.
    pub fn closest(&self, p: Point, max_dist: f64) -> Option<&Rc<BaseStar>> {
        if self.stars.is_empty() {
            return None;
        }
        let nearest = self.tree.nearest_one::<SquaredEuclidean>(&[p.x, p.y]);
        (nearest.distance <= max_dist * max_dist).then(|| &self.stars[nearest.item])
    }

    /// All stars within `radius` of `p`, in unspecified order.
    pub fn within(&self, p: Point, radius: f64) -> Vec<&Rc<BaseStar>> {
        self.tree
            .within_unsorted::<SquaredEuclidean>(&[p.x, p.y], radius * radius)
            .into_iter()
            .map(|hit| &self.stars[hit.item])
            .collect()
    }
}
