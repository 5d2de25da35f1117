pub mod codec;
pub mod config;
pub mod error;
pub mod hooks;
pub mod object;
pub mod protocol;
pub mod router;
pub mod rpc;
pub mod session;
pub mod ticker;
pub mod transport;

pub use codec::{CodecError, PacketPool, PacketReader, PacketWriter};
pub use config::NetConfig;
pub use error::{JoinError, NetError};
pub use hooks::{GameHooks, NullHooks};
pub use object::{
    BARE_DIRTY_BLOB, Body, OBJ_RPC_DAMAGE, OBJ_RPC_IMPACT, ObjectKind, ObjectMap,
    ProjectileBody, ProjectileDirty, ReplicatedObject, UnitBody, UnitDirty,
};
pub use protocol::{
    CloseReason, GameState, INVALID_NETWORK_ID, NetworkId, PROTOCOL_VERSION, PacketTag, PeerId,
    RpcType,
};
pub use router::Outbox;
pub use rpc::{RpcContext, RpcHandler, RpcTable};
pub use session::{Lobby, LobbyAd, MatchBoard, Matchmaker, NetSession, Peer, SessionState};
pub use ticker::{TaskId, Ticker};
pub use transport::{LoopbackHub, LoopbackTransport, PeerTransport, TransportEvent};
