pub const PROTOCOL_VERSION: u32 = 1;

/// Reserved network id meaning "no object". Allocation starts at 1.
pub const INVALID_NETWORK_ID: NetworkId = 0;

pub type PeerId = u64;
pub type NetworkId = u32;

/// Leading byte of every datagram. Values are stable within a protocol
/// version; unknown tags are dropped, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketTag {
    None = 0,
    P2p = 1,
    P2pClose = 2,
    Rpc = 3,
    Spawn = 4,
    Despawn = 5,
    Sync = 6,
    ObjectRpc = 7,
}

impl PacketTag {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PacketTag::None),
            1 => Some(PacketTag::P2p),
            2 => Some(PacketTag::P2pClose),
            3 => Some(PacketTag::Rpc),
            4 => Some(PacketTag::Spawn),
            5 => Some(PacketTag::Despawn),
            6 => Some(PacketTag::Sync),
            7 => Some(PacketTag::ObjectRpc),
            _ => None,
        }
    }
}

/// Global RPC identifiers. Payload schemas are fixed per protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RpcType {
    LobbyData = 0,
    StartGame = 1,
    GameState = 2,
    ChooseSeed = 3,
    MowZombie = 4,
    AddLadder = 5,
    ClientReady = 6,
}

impl RpcType {
    pub const COUNT: usize = 7;

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RpcType::LobbyData),
            1 => Some(RpcType::StartGame),
            2 => Some(RpcType::GameState),
            3 => Some(RpcType::ChooseSeed),
            4 => Some(RpcType::MowZombie),
            5 => Some(RpcType::AddLadder),
            6 => Some(RpcType::ClientReady),
            _ => None,
        }
    }
}

/// Shared session phase, broadcast by the host and mirrored by everyone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum GameState {
    #[default]
    Lobby = 0,
    ChoosingSides = 1,
    ChoosingSeeds = 2,
    Gameplay = 3,
    GameOver = 4,
}

impl GameState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(GameState::Lobby),
            1 => Some(GameState::ChoosingSides),
            2 => Some(GameState::ChoosingSeeds),
            3 => Some(GameState::Gameplay),
            4 => Some(GameState::GameOver),
            _ => None,
        }
    }
}

/// Reason carried by a P2pClose packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CloseReason {
    HostLeft = 0,
    Kicked = 1,
    Banned = 2,
}

impl CloseReason {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CloseReason::HostLeft),
            1 => Some(CloseReason::Kicked),
            2 => Some(CloseReason::Banned),
            _ => None,
        }
    }
}
