use serde::{Deserialize, Serialize};

use crate::codec::{DEFAULT_POOL_CAPACITY, DEFAULT_SCRATCH_CAPACITY};
use crate::protocol::PROTOCOL_VERSION;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConfig {
    /// Advertised with the lobby; joins are rejected on mismatch.
    pub protocol_version: u32,
    pub max_peers: usize,
    pub pool_capacity: usize,
    pub scratch_capacity: usize,
    /// Re-send spawn packets for live objects to late joiners.
    pub resync_on_join: bool,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            max_peers: 4,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            scratch_capacity: DEFAULT_SCRATCH_CAPACITY,
            resync_on_join: true,
        }
    }
}
