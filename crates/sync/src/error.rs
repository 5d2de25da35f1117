use crate::codec::CodecError;
use crate::protocol::{NetworkId, PeerId};

/// Per-packet and per-operation failures. Everything raised while handling an
/// inbound datagram is contained at the dispatch boundary: logged, dropped,
/// and never allowed to escape `pump`.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("unknown packet tag {0}")]
    UnknownTag(u8),
    #[error("unknown rpc id {0}")]
    UnknownRpc(u8),
    #[error("unknown object kind {0}")]
    UnknownKind(u8),
    #[error("unknown game state {0}")]
    UnknownGameState(u8),
    #[error("object {net_id} has no rpc {rpc_id}")]
    UnknownObjectRpc { net_id: NetworkId, rpc_id: u8 },
    #[error("peer {peer} may not {action} object {net_id}")]
    Unauthorized {
        peer: PeerId,
        net_id: NetworkId,
        action: &'static str,
    },
    #[error("peer {0} is not the session host")]
    NotHost(PeerId),
    #[error("no object with network id {0}")]
    MissingObject(NetworkId),
    #[error("network id {0} is already registered")]
    DuplicateObject(NetworkId),
    #[error("not in a lobby")]
    NotInLobby,
    #[error("local peer does not own object {0}")]
    NotOwner(NetworkId),
    #[error("transport send to peer {0} failed")]
    SendFailed(PeerId),
}

/// Outcome of a lobby create/join attempt, surfaced to the UI-facing layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("no lobby advertises code {0}")]
    NotFound(String),
    #[error("protocol version mismatch: ours {ours}, theirs {theirs}")]
    VersionMismatch { ours: u32, theirs: u32 },
    #[error("already in a lobby")]
    AlreadyInLobby,
}
