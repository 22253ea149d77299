//! The abstract surface the host game exposes to the networking core.
//!
//! The translator and the player adapters never touch engine objects
//! directly; everything flows through this trait. Hosts implement it
//! once and hand it in as `Arc<dyn WorldDriver>`.

use friendlink::{LoadedState, Location};

/// Opaque handle to a host-side object.
pub type ProxyRef = u64;

pub trait WorldDriver: Send + Sync + 'static {
    /// Creates the in-world object that bodies a remote player.
    fn place_proxy(&self) -> ProxyRef;

    fn remove_proxy(&self, proxy: ProxyRef);

    fn set_name(&self, proxy: ProxyRef, name: &str);

    /// Starts an engine-side translation towards `target` at `speed`
    /// units per second. The host reports completion back through
    /// [`crate::session::HostSession::mark_translation_complete`].
    fn translate_to(&self, proxy: ProxyRef, target: &Location, speed: f32);

    /// Moves the proxy immediately, attaching whatever cell `target`
    /// names.
    fn change_cell_to(&self, proxy: ProxyRef, target: &Location);

    /// Whether the cell named by `target` is currently attached in the
    /// host world.
    fn cell_attached(&self, target: &Location) -> bool;

    fn is_interior(&self, cell_id: u32) -> bool;

    // Local-player sampling.
    fn local_proxy(&self) -> ProxyRef;
    fn local_name(&self) -> String;
    fn local_cell_name(&self) -> String;
    fn local_world_space_name(&self) -> String;
    fn local_location(&self) -> Location;
    fn local_loaded_state(&self) -> LoadedState;

    /// Called once when the server link goes down, so the host can move
    /// its state machine to a disconnected stage.
    fn disconnected(&self) {}
}
