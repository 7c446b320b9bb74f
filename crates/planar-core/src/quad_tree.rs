//! Quad-tree spatial partition over body bounding boxes.
//!
//! A node holds entries until it overflows, then redistributes them into
//! four children ("partitioned"). A body is inserted into *every* child its
//! AABB overlaps, so neighbouring leaves can both see it. Nodes stop
//! splitting at rock bottom: maximum depth or minimum size.

use planar_types::{BodyId, QuadTreeConfig};

use crate::shape::Aabb;

/// A body reference stored in the tree.
#[derive(Debug, Clone, Copy)]
pub struct QuadTreeEntry {
    /// Dense body index at insertion time.
    pub index: usize,
    /// Stable body id.
    pub id: BodyId,
    /// World-space bounding box at insertion time.
    pub aabb: Aabb,
}

/// A quad-tree node.
#[derive(Debug, Clone)]
pub struct QuadTree {
    aabb: Aabb,
    depth: u32,
    config: QuadTreeConfig,
    entries: Vec<QuadTreeEntry>,
    children: Option<Box<[QuadTree; 4]>>,
    partitioned: bool,
}

impl QuadTree {
    /// Create a root node covering `aabb`.
    #[must_use]
    pub fn new(aabb: Aabb, config: QuadTreeConfig) -> Self {
        Self::with_depth(aabb, config, 0)
    }

    fn with_depth(aabb: Aabb, config: QuadTreeConfig, depth: u32) -> Self {
        Self {
            aabb,
            depth,
            config,
            entries: Vec::new(),
            children: None,
            partitioned: false,
        }
    }

    /// The region this node covers.
    #[must_use]
    pub fn aabb(&self) -> &Aabb {
        &self.aabb
    }

    /// Whether this node has redistributed its entries into children.
    #[must_use]
    pub fn partitioned(&self) -> bool {
        self.partitioned
    }

    /// Entries held directly by this node (leaves only).
    #[must_use]
    pub fn entries(&self) -> &[QuadTreeEntry] {
        &self.entries
    }

    /// Child nodes, present once the node has ever been partitioned.
    #[must_use]
    pub fn children(&self) -> Option<&[QuadTree; 4]> {
        self.children.as_deref()
    }

    fn full(&self) -> bool {
        self.entries.len() >= self.config.max_entities
    }

    fn rock_bottom(&self) -> bool {
        if self.depth >= self.config.max_depth {
            return true;
        }
        let dim = self.aabb.dimensions();
        dim.x * dim.y < self.config.min_size * self.config.min_size
    }

    /// Insert a body into this subtree.
    ///
    /// The entry lands in every descendant leaf whose region overlaps its
    /// bounding box; entries whose box misses this node entirely are
    /// ignored.
    pub fn insert(&mut self, entry: QuadTreeEntry) {
        if !self.aabb.overlaps(&entry.aabb) {
            return;
        }
        if self.full() && !self.rock_bottom() && !self.partitioned {
            self.subdivide();
        }
        if self.partitioned {
            self.insert_to_children(entry);
        } else {
            self.entries.push(entry);
        }
    }

    fn insert_to_children(&mut self, entry: QuadTreeEntry) {
        if let Some(children) = self.children.as_deref_mut() {
            for child in children {
                child.insert(entry);
            }
        }
    }

    fn subdivide(&mut self) {
        let mm = self.aabb.min;
        let mx = self.aabb.max;
        let mid = self.aabb.center();
        let depth = self.depth + 1;
        let config = self.config;

        self.children = Some(Box::new([
            // Top-left
            QuadTree::with_depth(
                Aabb::new(
                    nalgebra::Point2::new(mm.x, mid.y),
                    nalgebra::Point2::new(mid.x, mx.y),
                ),
                config,
                depth,
            ),
            // Top-right
            QuadTree::with_depth(Aabb::new(mid, mx), config, depth),
            // Bottom-left
            QuadTree::with_depth(Aabb::new(mm, mid), config, depth),
            // Bottom-right
            QuadTree::with_depth(
                Aabb::new(
                    nalgebra::Point2::new(mid.x, mm.y),
                    nalgebra::Point2::new(mx.x, mid.y),
                ),
                config,
                depth,
            ),
        ]));
        self.partitioned = true;

        let entries = std::mem::take(&mut self.entries);
        for entry in entries {
            self.insert_to_children(entry);
        }
    }

    /// Remove every entry and collapse partitioning.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.partitioned = false;
        self.children = None;
    }

    /// Replace the covered region (drops current contents).
    pub fn reset_region(&mut self, aabb: Aabb) {
        self.clear();
        self.aabb = aabb;
    }

    /// Walk the leaves and push each leaf's entry list.
    pub fn collect_partitions<'a>(&'a self, out: &mut Vec<&'a [QuadTreeEntry]>) {
        if !self.partitioned {
            out.push(&self.entries);
        } else if let Some(children) = self.children.as_deref() {
            for child in children {
                child.collect_partitions(out);
            }
        }
    }

    /// Refresh the stored bounding box of every entry in place.
    ///
    /// Entries whose body no longer resolves keep their stale box until the
    /// next full rebuild.
    pub fn refresh<F>(&mut self, lookup: F)
    where
        F: Fn(BodyId) -> Option<Aabb> + Copy,
    {
        for entry in &mut self.entries {
            if let Some(aabb) = lookup(entry.id) {
                entry.aabb = aabb;
            }
        }
        if let Some(children) = self.children.as_deref_mut() {
            for child in children {
                child.refresh(lookup);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use nalgebra::{Point2, Vector2};

    fn entry(index: usize, x: f64, y: f64, half: f64) -> QuadTreeEntry {
        QuadTreeEntry {
            index,
            id: BodyId::new(index as u64 + 1),
            aabb: Aabb::from_center(Point2::new(x, y), Vector2::new(half, half)),
        }
    }

    fn small_tree(max_entities: usize) -> QuadTree {
        let config = QuadTreeConfig {
            max_entities,
            max_depth: 8,
            min_size: 0.1,
            force_square_shape: false,
        };
        QuadTree::new(
            Aabb::new(Point2::new(-10.0, -10.0), Point2::new(10.0, 10.0)),
            config,
        )
    }

    #[test]
    fn test_insert_below_threshold_stays_leaf() {
        let mut tree = small_tree(4);
        for i in 0..3 {
            tree.insert(entry(i, i as f64, 0.0, 0.4));
        }
        assert!(!tree.partitioned());
        assert_eq!(tree.entries().len(), 3);
    }

    #[test]
    fn test_overflow_subdivides() {
        let mut tree = small_tree(2);
        tree.insert(entry(0, -5.0, -5.0, 0.4));
        tree.insert(entry(1, 5.0, 5.0, 0.4));
        tree.insert(entry(2, -5.0, 5.0, 0.4));

        assert!(tree.partitioned());
        let mut partitions = Vec::new();
        tree.collect_partitions(&mut partitions);
        let total: usize = partitions.iter().map(|p| p.len()).sum();
        assert_eq!(total, 3, "each body sits in exactly one quadrant here");
    }

    #[test]
    fn test_straddling_body_lands_in_multiple_leaves() {
        let mut tree = small_tree(2);
        tree.insert(entry(0, -5.0, -5.0, 0.4));
        tree.insert(entry(1, 5.0, 5.0, 0.4));
        // Straddles all four quadrants
        tree.insert(entry(2, 0.0, 0.0, 1.0));

        let mut partitions = Vec::new();
        tree.collect_partitions(&mut partitions);
        let copies = partitions
            .iter()
            .flat_map(|p| p.iter())
            .filter(|e| e.index == 2)
            .count();
        assert!(copies >= 2, "straddling body must appear in several leaves");
    }

    #[test]
    fn test_leaves_cover_body_aabb() {
        // Invariant: a body appears in every leaf overlapping its box
        let mut tree = small_tree(1);
        let bodies: Vec<_> = (0..12)
            .map(|i| entry(i, (i as f64) - 6.0, ((i * 3) % 7) as f64 - 3.0, 0.6))
            .collect();
        for b in &bodies {
            tree.insert(*b);
        }

        fn check(node: &QuadTree, body: &QuadTreeEntry) {
            if !node.aabb().overlaps(&body.aabb) {
                return;
            }
            if node.partitioned() {
                for child in node.children().unwrap().iter() {
                    check(child, body);
                }
            } else {
                assert!(
                    node.entries().iter().any(|e| e.index == body.index),
                    "leaf overlapping the body's AABB must contain it"
                );
            }
        }
        for b in &bodies {
            check(&tree, b);
        }
    }

    #[test]
    fn test_rock_bottom_depth_stops_splitting() {
        let config = QuadTreeConfig {
            max_entities: 1,
            max_depth: 0,
            min_size: 0.1,
            force_square_shape: false,
        };
        let mut tree = QuadTree::new(
            Aabb::new(Point2::new(-1.0, -1.0), Point2::new(1.0, 1.0)),
            config,
        );
        for i in 0..5 {
            tree.insert(entry(i, 0.0, 0.0, 0.1));
        }
        assert!(!tree.partitioned(), "depth 0 roots at max_depth never split");
        assert_eq!(tree.entries().len(), 5);
    }

    #[test]
    fn test_min_size_stops_splitting() {
        let config = QuadTreeConfig {
            max_entities: 1,
            max_depth: 32,
            min_size: 10.0,
            force_square_shape: false,
        };
        let mut tree = QuadTree::new(
            Aabb::new(Point2::new(-1.0, -1.0), Point2::new(1.0, 1.0)),
            config,
        );
        for i in 0..5 {
            tree.insert(entry(i, 0.0, 0.0, 0.1));
        }
        assert!(!tree.partitioned(), "nodes below min_size never split");
    }

    #[test]
    fn test_clear_and_refresh() {
        let mut tree = small_tree(2);
        for i in 0..6 {
            tree.insert(entry(i, i as f64 - 3.0, 0.0, 0.4));
        }
        assert!(tree.partitioned());

        // Refresh moves every stored box
        tree.refresh(|_| {
            Some(Aabb::from_center(
                Point2::new(9.0, 9.0),
                Vector2::new(0.1, 0.1),
            ))
        });
        let mut partitions = Vec::new();
        tree.collect_partitions(&mut partitions);
        for p in partitions.iter().flat_map(|p| p.iter()) {
            assert_eq!(p.aabb.center(), Point2::new(9.0, 9.0));
        }

        tree.clear();
        assert!(!tree.partitioned());
        let mut partitions = Vec::new();
        tree.collect_partitions(&mut partitions);
        assert_eq!(partitions.len(), 1);
        assert!(partitions[0].is_empty());
    }
}
