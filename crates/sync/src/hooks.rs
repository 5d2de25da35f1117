use crate::object::ReplicatedObject;
use crate::protocol::{CloseReason, GameState, NetworkId, PeerId};
use crate::session::Lobby;

/// Host-game collaborator surface. The sync layer treats the simulation as
/// opaque: handlers receive decoded payloads and the game decides what a
/// zombie, ladder, or seed slot actually is.
pub trait GameHooks {
    fn on_game_state(&mut self, _state: GameState) {}
    fn on_start_game(&mut self, _selection: u8) {}
    fn on_seed_chosen(&mut self, _peer: PeerId, _seed: u8) {}
    fn on_mow_zombie(&mut self, _row: i32, _target: Option<NetworkId>) {}
    fn on_add_ladder(&mut self, _grid_x: i32, _grid_y: i32) {}
    fn on_lobby_changed(&mut self, _lobby: &Lobby) {}
    fn on_object_spawned(&mut self, _object: &ReplicatedObject) {}
    fn on_object_despawned(&mut self, _net_id: NetworkId) {}
    fn on_projectile_impact(&mut self, _net_id: NetworkId, _target: NetworkId) {}
    /// The host closed our session (ban/kick) or left the lobby.
    fn on_forced_leave(&mut self, _reason: CloseReason) {}
}

/// No-op hooks for headless use and tests.
#[derive(Debug, Default)]
pub struct NullHooks;

impl GameHooks for NullHooks {}
