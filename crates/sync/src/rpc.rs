use crate::codec::{PacketReader, PacketWriter};
use crate::error::NetError;
use crate::hooks::GameHooks;
use crate::protocol::{GameState, INVALID_NETWORK_ID, PeerId, RpcType};
use crate::router::Outbox;
use crate::session::Lobby;

/// Everything a global RPC handler may touch: session state, the game
/// collaborator, and an outbox for re-broadcasts (flushed by the pump).
pub struct RpcContext<'a> {
    pub local_id: PeerId,
    pub lobby: &'a mut Lobby,
    pub hooks: &'a mut dyn GameHooks,
    pub outbox: &'a mut Outbox,
}

impl RpcContext<'_> {
    fn require_host(&self, sender: PeerId) -> Result<(), NetError> {
        if self.lobby.host_id() == sender {
            Ok(())
        } else {
            Err(NetError::NotHost(sender))
        }
    }
}

pub type RpcHandler =
    for<'a> fn(&mut RpcContext<'a>, PeerId, &mut PacketReader) -> Result<(), NetError>;

/// Static RpcType -> handler table, built once at session construction.
/// Indexed by the enum discriminant; no runtime registration, no scanning.
pub struct RpcTable {
    handlers: [RpcHandler; RpcType::COUNT],
}

impl Default for RpcTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcTable {
    pub fn new() -> Self {
        Self {
            handlers: [
                handle_lobby_data,   // RpcType::LobbyData
                handle_start_game,   // RpcType::StartGame
                handle_game_state,   // RpcType::GameState
                handle_choose_seed,  // RpcType::ChooseSeed
                handle_mow_zombie,   // RpcType::MowZombie
                handle_add_ladder,   // RpcType::AddLadder
                handle_client_ready, // RpcType::ClientReady
            ],
        }
    }

    pub fn dispatch(
        &self,
        rpc: RpcType,
        ctx: &mut RpcContext<'_>,
        sender: PeerId,
        reader: &mut PacketReader,
    ) -> Result<(), NetError> {
        (self.handlers[rpc as usize])(ctx, sender, reader)
    }
}

/// Authoritative membership/ready/game-state snapshot from the host.
fn handle_lobby_data(
    ctx: &mut RpcContext<'_>,
    sender: PeerId,
    reader: &mut PacketReader,
) -> Result<(), NetError> {
    ctx.require_host(sender)?;
    ctx.lobby.apply_peer_data(reader)?;
    ctx.hooks.on_lobby_changed(&*ctx.lobby);
    Ok(())
}

fn handle_start_game(
    ctx: &mut RpcContext<'_>,
    sender: PeerId,
    reader: &mut PacketReader,
) -> Result<(), NetError> {
    ctx.require_host(sender)?;
    let selection = reader.read_u8()?;
    ctx.hooks.on_start_game(selection);
    Ok(())
}

fn handle_game_state(
    ctx: &mut RpcContext<'_>,
    sender: PeerId,
    reader: &mut PacketReader,
) -> Result<(), NetError> {
    ctx.require_host(sender)?;
    let byte = reader.read_u8()?;
    let state = GameState::from_u8(byte).ok_or(NetError::UnknownGameState(byte))?;
    ctx.lobby.last_game_state = state;
    ctx.hooks.on_game_state(state);
    Ok(())
}

fn handle_choose_seed(
    ctx: &mut RpcContext<'_>,
    sender: PeerId,
    reader: &mut PacketReader,
) -> Result<(), NetError> {
    let seed = reader.read_u8()?;
    ctx.hooks.on_seed_chosen(sender, seed);
    Ok(())
}

fn handle_mow_zombie(
    ctx: &mut RpcContext<'_>,
    _sender: PeerId,
    reader: &mut PacketReader,
) -> Result<(), NetError> {
    let row = reader.read_i32()?;
    let target = reader.read_u32()?;
    let target = (target != INVALID_NETWORK_ID).then_some(target);
    ctx.hooks.on_mow_zombie(row, target);
    Ok(())
}

fn handle_add_ladder(
    ctx: &mut RpcContext<'_>,
    _sender: PeerId,
    reader: &mut PacketReader,
) -> Result<(), NetError> {
    let grid_x = reader.read_i32()?;
    let grid_y = reader.read_i32()?;
    ctx.hooks.on_add_ladder(grid_x, grid_y);
    Ok(())
}

fn handle_client_ready(
    ctx: &mut RpcContext<'_>,
    sender: PeerId,
    _reader: &mut PacketReader,
) -> Result<(), NetError> {
    match ctx.lobby.peer_mut(sender) {
        Some(peer) => peer.ready = true,
        None => {
            log::debug!("ready flag from unknown peer {sender}");
            return Ok(());
        }
    }
    ctx.hooks.on_lobby_changed(&*ctx.lobby);

    // The host relays the authoritative lobby snapshot back out.
    if ctx.local_id == ctx.lobby.host_id() && sender != ctx.local_id {
        let mut writer = PacketWriter::new();
        ctx.lobby.encode_peers(&mut writer);
        ctx.outbox.broadcast_rpc(RpcType::LobbyData, writer.as_slice());
    }
    Ok(())
}
