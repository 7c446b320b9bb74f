//! Explicit callback lists invoked at well-defined seams.
//!
//! Callbacks fire post-add, pre-remove, and after the narrow phase has
//! settled for the step (collision enter/exit), never inside solver inner
//! loops.

use planar_types::BodyId;

/// Callback over a single body.
pub type BodyCallback = Box<dyn FnMut(BodyId)>;

/// Callback over a body pair.
pub type PairCallback = Box<dyn FnMut(BodyId, BodyId)>;

/// Registered event callbacks of a world.
#[derive(Default)]
pub struct EventHooks {
    body_added: Vec<BodyCallback>,
    body_removing: Vec<BodyCallback>,
    collision_enter: Vec<PairCallback>,
    collision_exit: Vec<PairCallback>,
}

impl EventHooks {
    /// Register a callback fired after a body is added.
    pub fn on_body_added(&mut self, callback: BodyCallback) {
        self.body_added.push(callback);
    }

    /// Register a callback fired before a body is removed.
    pub fn on_body_removing(&mut self, callback: BodyCallback) {
        self.body_removing.push(callback);
    }

    /// Register a callback fired when a pair starts touching.
    pub fn on_collision_enter(&mut self, callback: PairCallback) {
        self.collision_enter.push(callback);
    }

    /// Register a callback fired when a pair stops touching.
    pub fn on_collision_exit(&mut self, callback: PairCallback) {
        self.collision_exit.push(callback);
    }

    pub(crate) fn emit_body_added(&mut self, id: BodyId) {
        for callback in &mut self.body_added {
            callback(id);
        }
    }

    pub(crate) fn emit_body_removing(&mut self, id: BodyId) {
        for callback in &mut self.body_removing {
            callback(id);
        }
    }

    pub(crate) fn emit_collision_enter(&mut self, a: BodyId, b: BodyId) {
        for callback in &mut self.collision_enter {
            callback(a, b);
        }
    }

    pub(crate) fn emit_collision_exit(&mut self, a: BodyId, b: BodyId) {
        for callback in &mut self.collision_exit {
            callback(a, b);
        }
    }
}

impl std::fmt::Debug for EventHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHooks")
            .field("body_added", &self.body_added.len())
            .field("body_removing", &self.body_removing.len())
            .field("collision_enter", &self.collision_enter.len())
            .field("collision_exit", &self.collision_exit.len())
            .finish()
    }
}
