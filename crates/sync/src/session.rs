use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::codec::{PacketPool, PacketReader, PacketWriter};
use crate::config::NetConfig;
use crate::error::{JoinError, NetError};
use crate::hooks::GameHooks;
use crate::object::{ObjectMap, ReplicatedObject};
use crate::protocol::{CloseReason, GameState, NetworkId, PacketTag, PeerId};
use crate::router::Outbox;
use crate::rpc::RpcTable;
use crate::ticker::{TaskId, Ticker};
use crate::transport::PeerTransport;

/// One connected participant. Created on a lobby-membership notification,
/// destroyed on leave/ban/disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: PeerId,
    pub name: String,
    pub is_host: bool,
    pub team: u8,
    pub ready: bool,
    pub handshake_complete: bool,
}

impl Peer {
    pub(crate) fn new(id: PeerId, name: impl Into<String>, is_host: bool) -> Self {
        Self {
            id,
            name: name.into(),
            is_host,
            team: 0,
            ready: false,
            handshake_complete: false,
        }
    }
}

/// Discoverable lobby metadata published through the matchmaking service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyAd {
    pub lobby_id: u64,
    pub host: PeerId,
    pub code: String,
    pub version: u32,
}

/// Matchmaking/discovery collaborator: create/search lobbies by join code.
/// Membership notifications are delivered out of band by the host process
/// (`NetSession::handle_peer_joined` / `handle_peer_left`).
pub trait Matchmaker {
    fn publish(&mut self, ad: LobbyAd);
    fn unpublish(&mut self, lobby_id: u64);
    fn find_by_code(&self, code: &str) -> Option<LobbyAd>;
}

/// In-memory matchmaking board shared between sessions in one process.
#[derive(Debug, Clone, Default)]
pub struct MatchBoard {
    ads: Rc<RefCell<Vec<LobbyAd>>>,
}

impl MatchBoard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Matchmaker for MatchBoard {
    fn publish(&mut self, ad: LobbyAd) {
        let mut ads = self.ads.borrow_mut();
        ads.retain(|existing| existing.lobby_id != ad.lobby_id);
        ads.push(ad);
    }

    fn unpublish(&mut self, lobby_id: u64) {
        self.ads.borrow_mut().retain(|ad| ad.lobby_id != lobby_id);
    }

    fn find_by_code(&self, code: &str) -> Option<LobbyAd> {
        self.ads.borrow().iter().find(|ad| ad.code == code).cloned()
    }
}

/// The live session container: membership, bans, shared game state, and the
/// replicated-object registry with its id counter. One per `NetSession`.
#[derive(Debug)]
pub struct Lobby {
    pub id: u64,
    pub code: String,
    pub last_game_state: GameState,
    host: PeerId,
    peers: HashMap<PeerId, Peer>,
    bans: HashSet<PeerId>,
    pub(crate) objects: ObjectMap,
}

impl Lobby {
    pub(crate) fn new(id: u64, code: impl Into<String>, host: PeerId) -> Self {
        Self {
            id,
            code: code.into(),
            last_game_state: GameState::default(),
            host,
            peers: HashMap::new(),
            bans: HashSet::new(),
            objects: ObjectMap::new(),
        }
    }

    pub fn host_id(&self) -> PeerId {
        self.host
    }

    pub fn is_member(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn is_banned(&self, id: PeerId) -> bool {
        self.bans.contains(&id)
    }

    pub fn peer(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub(crate) fn peer_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(&id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn objects(&self) -> &ObjectMap {
        &self.objects
    }

    pub(crate) fn add_peer(&mut self, peer: Peer) {
        self.peers.insert(peer.id, peer);
    }

    pub(crate) fn remove_peer(&mut self, id: PeerId) -> Option<Peer> {
        self.peers.remove(&id)
    }

    pub(crate) fn ban(&mut self, id: PeerId) {
        self.bans.insert(id);
    }

    /// Serialize game state + the full peer list. Sorted by peer id so the
    /// payload is deterministic.
    pub(crate) fn encode_peers(&self, writer: &mut PacketWriter) {
        writer.write_u8(self.last_game_state as u8);
        let mut peers: Vec<&Peer> = self.peers.values().collect();
        peers.sort_by_key(|peer| peer.id);
        writer.write_u8(peers.len() as u8);
        for peer in peers {
            writer.write_u64(peer.id);
            writer.write_str(&peer.name);
            writer.write_bool(peer.is_host);
            writer.write_u8(peer.team);
            writer.write_bool(peer.ready);
        }
    }

    /// Apply an authoritative peer list from the host. Existing peers keep
    /// their handshake flag; peers absent from the list are dropped.
    pub(crate) fn apply_peer_data(&mut self, reader: &mut PacketReader) -> Result<(), NetError> {
        let byte = reader.read_u8()?;
        let state = GameState::from_u8(byte).ok_or(NetError::UnknownGameState(byte))?;
        let count = reader.read_u8()? as usize;

        let mut seen = HashSet::with_capacity(count);
        for _ in 0..count {
            let id = reader.read_u64()?;
            let name = reader.read_str()?;
            let is_host = reader.read_bool()?;
            let team = reader.read_u8()?;
            let ready = reader.read_bool()?;
            seen.insert(id);

            let entry = self.peers.entry(id).or_insert_with(|| Peer::new(id, "", false));
            entry.name = name;
            entry.is_host = is_host;
            entry.team = team;
            entry.ready = ready;
            if is_host {
                self.host = id;
            }
        }
        self.peers.retain(|id, _| seen.contains(id));
        self.last_game_state = state;
        Ok(())
    }
}

/// Local peer's relationship to a lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Hosting,
    /// Joined via code; waiting for the host's first lobby snapshot.
    Joining,
    InLobby,
}

/// The synchronization core. Owns every moving part — transport, lobby,
/// object registry, RPC table, hooks, codec pool, ticker — and is driven by
/// the host process with one `pump()` per frame. No global state.
pub struct NetSession {
    pub(crate) local_id: PeerId,
    pub(crate) local_name: String,
    pub(crate) state: SessionState,
    pub(crate) config: NetConfig,
    pub(crate) transport: Box<dyn PeerTransport>,
    pub(crate) matchmaker: Box<dyn Matchmaker>,
    pub(crate) hooks: Box<dyn GameHooks>,
    pub(crate) lobby: Option<Lobby>,
    pub(crate) rpc: RpcTable,
    pub(crate) pool: PacketPool,
    pub(crate) ticker: Ticker<Box<dyn GameHooks>>,
    pub(crate) outbox: Outbox,
}

impl NetSession {
    pub fn new(
        local_name: impl Into<String>,
        transport: Box<dyn PeerTransport>,
        matchmaker: Box<dyn Matchmaker>,
        hooks: Box<dyn GameHooks>,
        config: NetConfig,
    ) -> Self {
        let pool = PacketPool::with_scratch(config.pool_capacity, config.scratch_capacity);
        Self {
            local_id: transport.local_id(),
            local_name: local_name.into(),
            state: SessionState::Idle,
            config,
            transport,
            matchmaker,
            hooks,
            lobby: None,
            rpc: RpcTable::new(),
            pool,
            ticker: Ticker::new(),
            outbox: Outbox::default(),
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_host(&self) -> bool {
        self.lobby
            .as_ref()
            .is_some_and(|lobby| lobby.host_id() == self.local_id)
    }

    pub fn lobby(&self) -> Option<&Lobby> {
        self.lobby.as_ref()
    }

    pub fn object_mut(&mut self, net_id: NetworkId) -> Option<&mut ReplicatedObject> {
        self.lobby.as_mut()?.objects.get_mut(net_id)
    }

    /// Run `action` against the game hooks after `ticks` pumps.
    pub fn schedule(
        &mut self,
        ticks: u32,
        action: impl FnOnce(&mut dyn GameHooks) + 'static,
    ) -> TaskId {
        self.ticker
            .after(ticks, move |hooks: &mut Box<dyn GameHooks>| {
                action(hooks.as_mut())
            })
    }

    pub fn cancel_task(&mut self, id: TaskId) -> bool {
        self.ticker.cancel(id)
    }

    /// Create a lobby, publish its join code, seed the local host peer.
    pub fn create_lobby(&mut self) -> Result<String, JoinError> {
        if self.lobby.is_some() {
            return Err(JoinError::AlreadyInLobby);
        }
        let lobby_id = rand_u64();
        let code = join_code();
        self.matchmaker.publish(LobbyAd {
            lobby_id,
            host: self.local_id,
            code: code.clone(),
            version: self.config.protocol_version,
        });

        let mut lobby = Lobby::new(lobby_id, code.clone(), self.local_id);
        let mut local = Peer::new(self.local_id, self.local_name.clone(), true);
        local.handshake_complete = true;
        lobby.add_peer(local);
        self.lobby = Some(lobby);
        self.state = SessionState::Hosting;
        if let Some(lobby) = self.lobby.as_ref() {
            self.hooks.on_lobby_changed(lobby);
        }
        log::info!("hosting lobby {lobby_id} with code {code}");
        Ok(code)
    }

    /// Look up a lobby by join code and enter it. "No such code" and
    /// "wrong version" are distinct outcomes; neither leaves local state
    /// behind.
    pub fn join_by_code(&mut self, code: &str) -> Result<(), JoinError> {
        if self.lobby.is_some() {
            return Err(JoinError::AlreadyInLobby);
        }
        let ad = self
            .matchmaker
            .find_by_code(code)
            .ok_or_else(|| JoinError::NotFound(code.to_string()))?;
        if ad.version != self.config.protocol_version {
            return Err(JoinError::VersionMismatch {
                ours: self.config.protocol_version,
                theirs: ad.version,
            });
        }

        let mut lobby = Lobby::new(ad.lobby_id, ad.code, ad.host);
        lobby.add_peer(Peer::new(ad.host, "", true));
        lobby.add_peer(Peer::new(self.local_id, self.local_name.clone(), false));
        self.lobby = Some(lobby);
        self.state = SessionState::Joining;
        if let Some(lobby) = self.lobby.as_ref() {
            self.hooks.on_lobby_changed(lobby);
        }
        log::info!("joining lobby {} hosted by {}", ad.lobby_id, ad.host);
        Ok(())
    }

    /// Membership notification from the discovery layer. The host probes the
    /// newcomer immediately to warm up the P2P session, pushes the lobby
    /// snapshot, and replays spawn packets for every live object.
    pub fn handle_peer_joined(&mut self, id: PeerId, name: &str) {
        let Some(lobby) = self.lobby.as_mut() else {
            return;
        };
        if id == self.local_id {
            return;
        }
        if lobby.is_banned(id) {
            log::warn!("banned peer {id} reported as joined; ignoring");
            return;
        }
        if let Some(peer) = lobby.peer_mut(id) {
            // Already known (e.g. the host learned from the lobby ad); just
            // pick up the display name.
            peer.name = name.to_string();
            if let Some(lobby) = self.lobby.as_ref() {
                self.hooks.on_lobby_changed(lobby);
            }
            return;
        }
        if lobby.peer_count() >= self.config.max_peers {
            log::warn!("lobby full; ignoring join from {id}");
            return;
        }
        lobby.add_peer(Peer::new(id, name, false));
        if let Some(lobby) = self.lobby.as_ref() {
            self.hooks.on_lobby_changed(lobby);
        }

        if self.is_host() {
            if let Err(err) = self.send_to_one(id, PacketTag::P2p, &[]) {
                log::warn!("handshake probe to {id} failed: {err}");
            }
            if self.config.resync_on_join {
                self.resync_objects_to(id);
            }
            self.broadcast_lobby_data();
        }
    }

    /// Membership notification: a peer left, disconnected, or was banned.
    /// Objects it owned are removed locally on every remaining peer — the
    /// departed owner can never sync or despawn them again.
    pub fn handle_peer_left(&mut self, id: PeerId) {
        let (orphaned, host_left) = {
            let Some(lobby) = self.lobby.as_mut() else {
                return;
            };
            if lobby.remove_peer(id).is_none() {
                return;
            }
            let orphaned = lobby.objects.owned_by(id);
            for net_id in &orphaned {
                lobby.objects.remove(*net_id);
            }
            (orphaned, lobby.host_id() == id)
        };
        for net_id in orphaned {
            self.hooks.on_object_despawned(net_id);
            log::debug!("despawned object {net_id} after owner {id} left");
        }
        self.transport.close_session(id);

        if host_left && !self.is_host() {
            log::info!("host {id} left; leaving lobby");
            self.hooks.on_forced_leave(CloseReason::HostLeft);
            self.leave_lobby();
            return;
        }

        if let Some(lobby) = self.lobby.as_ref() {
            self.hooks.on_lobby_changed(lobby);
        }
        if self.is_host() {
            self.broadcast_lobby_data();
        }
    }

    /// Host-only: ban a peer, tell it why, and drop it from the lobby.
    pub fn ban_peer(&mut self, id: PeerId) -> Result<(), NetError> {
        if self.lobby.is_none() {
            return Err(NetError::NotInLobby);
        }
        if !self.is_host() {
            return Err(NetError::NotHost(self.local_id));
        }
        if let Err(err) = self.send_to_one(id, PacketTag::P2pClose, &[CloseReason::Banned as u8]) {
            log::warn!("ban notice to {id} failed: {err}");
        }
        if let Some(lobby) = self.lobby.as_mut() {
            lobby.ban(id);
        }
        log::info!("banned peer {id}");
        self.handle_peer_left(id);
        Ok(())
    }

    /// Host-only: broadcast the shared game state, mirrored locally via echo.
    pub fn set_game_state(&mut self, state: GameState) -> Result<(), NetError> {
        if self.lobby.is_none() {
            return Err(NetError::NotInLobby);
        }
        if !self.is_host() {
            return Err(NetError::NotHost(self.local_id));
        }
        self.send_rpc(crate::protocol::RpcType::GameState, &[state as u8], true)
    }

    /// Host-only: start the match with the chosen selection set.
    pub fn start_game(&mut self, selection: u8) -> Result<(), NetError> {
        if self.lobby.is_none() {
            return Err(NetError::NotInLobby);
        }
        if !self.is_host() {
            return Err(NetError::NotHost(self.local_id));
        }
        self.send_rpc(crate::protocol::RpcType::StartGame, &[selection], true)
    }

    pub fn choose_seed(&mut self, seed: u8) -> Result<(), NetError> {
        self.send_rpc(crate::protocol::RpcType::ChooseSeed, &[seed], true)
    }

    pub fn mow_zombie(&mut self, row: i32, target: Option<NetworkId>) -> Result<(), NetError> {
        let mut writer = PacketWriter::new();
        writer.write_i32(row);
        writer.write_u32(target.unwrap_or(crate::protocol::INVALID_NETWORK_ID));
        let payload = writer.as_slice().to_vec();
        self.send_rpc(crate::protocol::RpcType::MowZombie, &payload, true)
    }

    pub fn add_ladder(&mut self, grid_x: i32, grid_y: i32) -> Result<(), NetError> {
        let mut writer = PacketWriter::new();
        writer.write_i32(grid_x);
        writer.write_i32(grid_y);
        let payload = writer.as_slice().to_vec();
        self.send_rpc(crate::protocol::RpcType::AddLadder, &payload, true)
    }

    pub fn set_ready(&mut self) -> Result<(), NetError> {
        self.send_rpc(crate::protocol::RpcType::ClientReady, &[], true)
    }

    /// Tear the session down. Queued inbound datagrams for the old lobby are
    /// discarded by the membership check in `pump`.
    pub fn leave_lobby(&mut self) {
        let Some(lobby) = self.lobby.take() else {
            return;
        };
        if lobby.host_id() == self.local_id {
            self.matchmaker.unpublish(lobby.id);
        }
        for peer in lobby.peers() {
            if peer.id != self.local_id {
                self.transport.close_session(peer.id);
            }
        }
        self.ticker.cancel_all();
        self.state = SessionState::Idle;
        log::info!("left lobby {}", lobby.id);
    }
}

pub(crate) fn rand_u64() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let state = RandomState::new();
    let mut hasher = state.build_hasher();
    hasher.write_u64(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64,
    );
    hasher.finish()
}

/// Six characters from an unambiguous alphabet (no 0/O, 1/I/L).
fn join_code() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
    let mut value = rand_u64();
    (0..6)
        .map(|_| {
            let ch = ALPHABET[(value % ALPHABET.len() as u64) as usize];
            value /= ALPHABET.len() as u64;
            ch as char
        })
        .collect()
}
