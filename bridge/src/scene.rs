use std::fmt::Debug;
use std::hash::Hash;

use rlbridge_shared::vec3::Vector3;

/// Capabilities the host scene and interpreter expose to the bridge.
///
/// Entities are addressed by `Handle`, a cheap non-owning key into the host's own
/// entity table. The bridge never assumes a handle stays valid: the host must call
/// `SyncManager::forget_target` before it destroys or reuses an entity.
pub trait SceneHost {
    type Handle: Copy + Eq + Hash + Debug;

    /// Every entity currently in the scene, for lazy binding discovery.
    fn entities(&self) -> Vec<Self::Handle>;

    /// The entity's name (`"ball"`, `"player-1"`, ...), or None if it no longer exists.
    fn identity(&self, entity: Self::Handle) -> Option<String>;

    fn set_position(&mut self, entity: Self::Handle, position: Vector3);

    /// Heading in scene degrees (0 = up, 90 = right).
    fn set_heading(&mut self, entity: Self::Handle, degrees: f64);

    /// Halt any scripts currently driving the entity.
    fn stop_scripts(&mut self, entity: Self::Handle);

    /// Fire every script listening for new simulator data.
    fn broadcast_new_data(&mut self);
}
