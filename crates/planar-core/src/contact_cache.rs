//! Contact cache: matches contacts across steps and feeds warm starting.
//!
//! Every detected contact point is keyed by `(min(id₁,id₂), max(id₁,id₂),
//! manifold slot)`. A point matching an existing entry inherits the entry's
//! accumulated impulses, rescaled by `dt_now / dt_prev` so the transmitted
//! force stays continuous across timestep changes. Entries not observed for
//! `contact_lifetime` consecutive steps are evicted. Matching also
//! deduplicates: a key seen twice in one step (duplicate pairs from
//! quad-tree leaves) seeds the solver exactly once.

use hashbrown::HashMap;

use planar_types::BodyId;

use crate::body::BodyStore;
use crate::collision::Collision;
use crate::contact_constraint::{ContactConstraint, ContactKey};

/// Persistent store of contact constraints.
#[derive(Debug, Clone, Default)]
pub struct ContactCache {
    constraints: Vec<ContactConstraint>,
    by_key: HashMap<ContactKey, usize>,
}

impl ContactCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached constraints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Constraints in stored order.
    #[must_use]
    pub fn constraints(&self) -> &[ContactConstraint] {
        &self.constraints
    }

    /// Mutable constraints in stored order.
    pub fn constraints_mut(&mut self) -> &mut [ContactConstraint] {
        &mut self.constraints
    }

    /// Constraints observed this step, in stored order.
    pub fn matched_mut(&mut self) -> impl Iterator<Item = &mut ContactConstraint> {
        self.constraints.iter_mut().filter(|c| c.is_matched())
    }

    /// Pairs with at least one matched contact this step.
    #[must_use]
    pub fn active_pairs(&self) -> Vec<(BodyId, BodyId)> {
        let mut pairs: Vec<_> = self
            .constraints
            .iter()
            .filter(|c| c.is_matched())
            .map(|c| {
                let k = c.key();
                (k.low, k.high)
            })
            .collect();
        pairs.sort_unstable();
        pairs.dedup();
        pairs
    }

    /// Reset per-step match flags (call at the start of each step).
    pub fn begin_step(&mut self) {
        for constraint in &mut self.constraints {
            constraint.matched = false;
        }
    }

    /// Fold the current collision set into the cache.
    ///
    /// New contact points create fresh entries; matched points refresh
    /// geometry and, on their first match of the step, rescale the carried
    /// impulses by `dt_ratio`. Returns the ids of bodies participating in a
    /// newly created contact (used to wake them).
    pub fn absorb(
        &mut self,
        collisions: &[Collision],
        bodies: &BodyStore,
        dt_ratio: f64,
    ) -> Vec<BodyId> {
        let mut woken = Vec::new();

        for collision in collisions.iter().filter(|c| c.valid) {
            for (slot, point) in collision.manifold.iter() {
                let key = ContactKey::new(collision.first, collision.second, slot);

                if let Some(&index) = self.by_key.get(&key) {
                    let constraint = &mut self.constraints[index];
                    let first_match = !constraint.matched;
                    constraint.update(collision.normal, point, bodies);
                    if first_match {
                        constraint.rescale_impulses(dt_ratio);
                        constraint.matched = true;
                        constraint.unmatched_steps = 0;
                    }
                } else if let Some(constraint) = ContactConstraint::new(
                    key,
                    collision.first,
                    collision.second,
                    collision.normal,
                    point,
                    bodies,
                ) {
                    self.by_key.insert(key, self.constraints.len());
                    self.constraints.push(constraint);
                    woken.push(collision.first);
                    woken.push(collision.second);
                }
            }
        }
        woken
    }

    /// Age unmatched entries and evict the expired (end of each step).
    pub fn finish_step(&mut self, contact_lifetime: u32) {
        let mut index = 0;
        while index < self.constraints.len() {
            let constraint = &mut self.constraints[index];
            if !constraint.matched {
                constraint.unmatched_steps += 1;
                if constraint.unmatched_steps >= contact_lifetime {
                    self.remove_at(index);
                    continue;
                }
            }
            index += 1;
        }
    }

    /// Drop every entry referencing a body that no longer resolves.
    pub fn prune_missing(&mut self, bodies: &BodyStore) {
        let mut index = 0;
        while index < self.constraints.len() {
            let key = self.constraints[index].key();
            if bodies.index_of(key.low).is_none() || bodies.index_of(key.high).is_none() {
                self.remove_at(index);
            } else {
                index += 1;
            }
        }
    }

    /// Drop everything (checkpoint revert).
    pub fn clear(&mut self) {
        self.constraints.clear();
        self.by_key.clear();
    }

    fn remove_at(&mut self, index: usize) {
        let removed = self.constraints.swap_remove(index);
        self.by_key.remove(&removed.key());
        if index < self.constraints.len() {
            let moved_key = self.constraints[index].key();
            self.by_key.insert(moved_key, index);
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::manifold::{Manifold, ManifoldPoint};
    use approx::assert_relative_eq;
    use nalgebra::{Point2, Vector2};
    use planar_types::{BodySpec, ShapeSpec};

    const MATERIALS: (f64, f64) = (0.0, 0.5);

    fn store_and_collision() -> (BodyStore, Collision) {
        let mut store = BodyStore::new();
        let a = store
            .add(
                &BodySpec::new()
                    .position(Point2::new(-0.45, 0.0))
                    .shape(ShapeSpec::circle(0.5)),
                MATERIALS,
            )
            .unwrap();
        let b = store
            .add(
                &BodySpec::new()
                    .position(Point2::new(0.45, 0.0))
                    .shape(ShapeSpec::circle(0.5)),
                MATERIALS,
            )
            .unwrap();

        let collision = Collision {
            first: a,
            second: b,
            normal: Vector2::x(),
            depth: 0.1,
            manifold: Manifold::single(ManifoldPoint {
                on_first: Point2::new(0.05, 0.0),
                on_second: Point2::new(-0.05, 0.0),
                penetration: 0.1,
            }),
            valid: true,
        };
        (store, collision)
    }

    #[test]
    fn test_new_contact_creates_entry() {
        let (store, collision) = store_and_collision();
        let mut cache = ContactCache::new();

        cache.begin_step();
        let woken = cache.absorb(&[collision], &store, 1.0);

        assert_eq!(cache.len(), 1);
        assert_eq!(woken.len(), 2);
        assert!(cache.constraints()[0].is_matched());
    }

    #[test]
    fn test_match_carries_rescaled_impulses() {
        let (store, collision) = store_and_collision();
        let mut cache = ContactCache::new();

        cache.begin_step();
        cache.absorb(&[collision.clone()], &store, 1.0);
        cache.constraints_mut()[0].normal_impulse = 2.0;
        cache.constraints_mut()[0].tangent_impulse = -0.5;

        // Next step with a halved timestep: impulses scale by dt_new/dt_old
        cache.begin_step();
        let woken = cache.absorb(&[collision], &store, 0.5);

        assert!(woken.is_empty(), "matched contact wakes nobody new");
        assert_relative_eq!(cache.constraints()[0].normal_impulse, 1.0, epsilon = 1e-12);
        assert_relative_eq!(
            cache.constraints()[0].tangent_impulse,
            -0.25,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_duplicate_observation_rescales_once() {
        let (store, collision) = store_and_collision();
        let mut cache = ContactCache::new();

        cache.begin_step();
        cache.absorb(&[collision.clone()], &store, 1.0);
        cache.constraints_mut()[0].normal_impulse = 4.0;

        cache.begin_step();
        // The same pair arrives twice (duplicate quad-tree leaves)
        cache.absorb(&[collision.clone(), collision], &store, 0.5);

        assert_eq!(cache.len(), 1, "one constraint per key");
        assert_relative_eq!(cache.constraints()[0].normal_impulse, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_eviction_after_lifetime() {
        let (store, collision) = store_and_collision();
        let mut cache = ContactCache::new();

        cache.begin_step();
        cache.absorb(&[collision], &store, 1.0);
        cache.finish_step(2);
        assert_eq!(cache.len(), 1);

        // Two steps without observation: evicted at the default lifetime
        cache.begin_step();
        cache.finish_step(2);
        assert_eq!(cache.len(), 1);

        cache.begin_step();
        cache.finish_step(2);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_reobservation_resets_age() {
        let (store, collision) = store_and_collision();
        let mut cache = ContactCache::new();

        cache.begin_step();
        cache.absorb(&[collision.clone()], &store, 1.0);
        cache.finish_step(2);

        cache.begin_step();
        cache.finish_step(2); // one unmatched step

        cache.begin_step();
        cache.absorb(&[collision], &store, 1.0); // seen again
        cache.finish_step(2);

        cache.begin_step();
        cache.finish_step(2); // one unmatched step again: still alive
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_prune_missing_bodies() {
        let (mut store, collision) = store_and_collision();
        let mut cache = ContactCache::new();

        cache.begin_step();
        cache.absorb(&[collision], &store, 1.0);

        store.remove(planar_types::BodyId::new(1)).unwrap();
        cache.prune_missing(&store);
        assert!(cache.is_empty());
    }
}
