use crate::codec::PacketReader;
use crate::error::NetError;
use crate::object::{Body, ObjectKind, ReplicatedObject};
use crate::protocol::{CloseReason, NetworkId, PacketTag, PeerId, RpcType};
use crate::rpc::RpcContext;
use crate::session::{NetSession, SessionState};
use crate::transport::TransportEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    All,
    One(PeerId),
}

#[derive(Debug)]
pub(crate) struct Outbound {
    pub target: Target,
    pub bytes: Vec<u8>,
}

/// Deferred sends queued while the session is mid-dispatch (RPC handlers
/// cannot touch the transport directly); flushed at the end of each pump.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: Vec<Outbound>,
}

impl Outbox {
    pub(crate) fn broadcast_rpc(&mut self, rpc: RpcType, payload: &[u8]) {
        let mut bytes = Vec::with_capacity(payload.len() + 2);
        bytes.push(PacketTag::Rpc as u8);
        bytes.push(rpc as u8);
        bytes.extend_from_slice(payload);
        self.queue.push(Outbound {
            target: Target::All,
            bytes,
        });
    }

    pub(crate) fn send_rpc_to(&mut self, peer: PeerId, rpc: RpcType, payload: &[u8]) {
        let mut bytes = Vec::with_capacity(payload.len() + 2);
        bytes.push(PacketTag::Rpc as u8);
        bytes.push(rpc as u8);
        bytes.extend_from_slice(payload);
        self.queue.push(Outbound {
            target: Target::One(peer),
            bytes,
        });
    }

    pub(crate) fn drain(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.queue)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl NetSession {
    /// One frame of network work: author deltas for dirty owned objects, run
    /// due scheduled tasks, service connection events, drain the inbox, and
    /// flush deferred sends. Per-packet failures are logged and contained
    /// here; nothing a remote peer sends can make this return an error.
    pub fn pump(&mut self) {
        self.sync_pass();
        self.ticker.tick(&mut self.hooks);
        self.service_transport_events();
        self.drain_inbox();
        self.flush_outbox();
    }

    fn sync_pass(&mut self) {
        let Some(lobby) = self.lobby.as_mut() else {
            return;
        };
        let dirty = lobby.objects.dirty_owned_by(self.local_id);
        if dirty.is_empty() {
            return;
        }
        let targets: Vec<PeerId> = lobby
            .peers()
            .map(|peer| peer.id)
            .filter(|&id| id != self.local_id)
            .collect();

        let mut writer = self.pool.writer();
        for net_id in dirty {
            let Some(object) = lobby.objects.get_mut(net_id) else {
                continue;
            };
            writer.clear();
            writer.write_tag(PacketTag::Sync);
            writer.write_u32(net_id);
            writer.write_u32(object.dirty_mask());
            object.write_delta(&mut writer);
            object.clear_dirty();
            for &peer in &targets {
                if !self.transport.send(peer, writer.as_slice()) {
                    log::warn!("sync of object {net_id} to {peer} failed");
                }
            }
        }
        self.pool.recycle_writer(writer);
    }

    fn service_transport_events(&mut self) {
        while let Some(event) = self.transport.poll_event() {
            match event {
                TransportEvent::SessionRequested(peer) => {
                    let allow = self
                        .lobby
                        .as_ref()
                        .is_some_and(|lobby| lobby.is_member(peer) && !lobby.is_banned(peer));
                    if allow {
                        self.transport.accept_session(peer);
                        if let Some(peer) =
                            self.lobby.as_mut().and_then(|lobby| lobby.peer_mut(peer))
                        {
                            peer.handshake_complete = true;
                        }
                    } else {
                        log::warn!("rejecting session request from non-member {peer}");
                        self.transport.close_session(peer);
                    }
                }
                TransportEvent::SessionFailed { peer, reason } => {
                    log::warn!("session with {peer} failed: {reason}");
                }
            }
        }
    }

    fn drain_inbox(&mut self) {
        while let Some((sender, bytes)) = self.transport.try_recv() {
            let allowed = self
                .lobby
                .as_ref()
                .is_some_and(|lobby| lobby.is_member(sender) && !lobby.is_banned(sender));
            if !allowed {
                log::debug!("dropping datagram from non-member or banned peer {sender}");
                continue;
            }
            let mut reader = self.pool.reader();
            reader.load(&bytes);
            if let Err(err) = self.dispatch(sender, &mut reader) {
                log::warn!("dropping packet from {sender}: {err}");
            }
            self.pool.recycle_reader(reader);
        }
    }

    fn flush_outbox(&mut self) {
        if self.outbox.is_empty() {
            return;
        }
        for outbound in self.outbox.drain() {
            match outbound.target {
                Target::All => self.send_frame_to_all(&outbound.bytes),
                Target::One(peer) => {
                    if !self.transport.send(peer, &outbound.bytes) {
                        log::warn!("deferred send to {peer} failed");
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, sender: PeerId, reader: &mut PacketReader) -> Result<(), NetError> {
        let byte = reader.read_u8()?;
        let tag = PacketTag::from_u8(byte).ok_or(NetError::UnknownTag(byte))?;
        match tag {
            PacketTag::None => Ok(()),
            PacketTag::P2p => {
                // Handshake probe; payload is empty.
                if let Some(peer) = self.lobby.as_mut().and_then(|lobby| lobby.peer_mut(sender)) {
                    peer.handshake_complete = true;
                }
                Ok(())
            }
            PacketTag::P2pClose => self.handle_close(sender, reader),
            PacketTag::Rpc => {
                let byte = reader.read_u8()?;
                let rpc = RpcType::from_u8(byte).ok_or(NetError::UnknownRpc(byte))?;
                self.dispatch_rpc(rpc, sender, reader)
            }
            PacketTag::Spawn => self.handle_spawn(sender, reader),
            PacketTag::Despawn => self.handle_despawn(sender, reader),
            PacketTag::Sync => self.handle_sync(sender, reader),
            PacketTag::ObjectRpc => self.handle_object_rpc(sender, reader),
        }
    }

    pub(crate) fn dispatch_rpc(
        &mut self,
        rpc: RpcType,
        sender: PeerId,
        reader: &mut PacketReader,
    ) -> Result<(), NetError> {
        let result = {
            let lobby = self.lobby.as_mut().ok_or(NetError::NotInLobby)?;
            let mut ctx = RpcContext {
                local_id: self.local_id,
                lobby,
                hooks: self.hooks.as_mut(),
                outbox: &mut self.outbox,
            };
            self.rpc.dispatch(rpc, &mut ctx, sender, reader)
        };
        // The first lobby snapshot completes a join in progress.
        if result.is_ok() && rpc == RpcType::LobbyData && self.state == SessionState::Joining {
            self.state = SessionState::InLobby;
            log::info!("join complete, lobby snapshot applied");
        }
        result
    }

    fn handle_close(&mut self, sender: PeerId, reader: &mut PacketReader) -> Result<(), NetError> {
        let host = self
            .lobby
            .as_ref()
            .map(|lobby| lobby.host_id())
            .ok_or(NetError::NotInLobby)?;
        if sender != host {
            return Err(NetError::NotHost(sender));
        }
        let byte = reader.read_u8()?;
        let reason = CloseReason::from_u8(byte).unwrap_or(CloseReason::Kicked);
        log::info!("session closed by host {sender}: {reason:?}");
        self.hooks.on_forced_leave(reason);
        self.leave_lobby();
        Ok(())
    }

    fn handle_spawn(&mut self, sender: PeerId, reader: &mut PacketReader) -> Result<(), NetError> {
        let net_id = reader.read_u32()?;
        let owner = reader.read_u64()?;
        let byte = reader.read_u8()?;
        let kind = ObjectKind::from_u8(byte).ok_or(NetError::UnknownKind(byte))?;

        let Some(lobby) = self.lobby.as_mut() else {
            return Err(NetError::NotInLobby);
        };
        // Spawns come from the owner, or from the host replaying state to a
        // late joiner.
        if sender != owner && sender != lobby.host_id() {
            return Err(NetError::Unauthorized {
                peer: sender,
                net_id,
                action: "spawn",
            });
        }
        if lobby.objects.contains(net_id) {
            log::debug!("ignoring duplicate spawn for object {net_id}");
            return Ok(());
        }
        let object = ReplicatedObject::read_spawn(net_id, owner, kind, reader)?;
        lobby.objects.observe_remote_id(net_id);
        lobby.objects.insert(object)?;

        if let Some(object) = self
            .lobby
            .as_ref()
            .and_then(|lobby| lobby.objects().get(net_id))
        {
            self.hooks.on_object_spawned(object);
        }
        Ok(())
    }

    fn handle_despawn(
        &mut self,
        sender: PeerId,
        reader: &mut PacketReader,
    ) -> Result<(), NetError> {
        let net_id = reader.read_u32()?;
        let Some(lobby) = self.lobby.as_mut() else {
            return Err(NetError::NotInLobby);
        };
        let Some(object) = lobby.objects.get(net_id) else {
            return Err(NetError::MissingObject(net_id));
        };
        if object.owner() != sender {
            return Err(NetError::Unauthorized {
                peer: sender,
                net_id,
                action: "despawn",
            });
        }
        lobby.objects.remove(net_id);
        self.hooks.on_object_despawned(net_id);
        Ok(())
    }

    fn handle_sync(&mut self, sender: PeerId, reader: &mut PacketReader) -> Result<(), NetError> {
        let net_id = reader.read_u32()?;
        let mask = reader.read_u32()?;
        let Some(lobby) = self.lobby.as_mut() else {
            return Err(NetError::NotInLobby);
        };
        let Some(object) = lobby.objects.get_mut(net_id) else {
            return Err(NetError::MissingObject(net_id));
        };
        if object.owner() != sender {
            return Err(NetError::Unauthorized {
                peer: sender,
                net_id,
                action: "sync",
            });
        }
        object.apply_delta(reader, mask)?;
        Ok(())
    }

    fn handle_object_rpc(
        &mut self,
        sender: PeerId,
        reader: &mut PacketReader,
    ) -> Result<(), NetError> {
        let rpc_id = reader.read_u8()?;
        let net_id = reader.read_u32()?;
        let Some(lobby) = self.lobby.as_mut() else {
            return Err(NetError::NotInLobby);
        };
        let Some(object) = lobby.objects.get_mut(net_id) else {
            return Err(NetError::MissingObject(net_id));
        };
        object.handle_rpc(sender, rpc_id, reader, self.hooks.as_mut())
    }

    fn broadcast_targets(&self) -> Vec<PeerId> {
        match self.lobby.as_ref() {
            Some(lobby) => lobby
                .peers()
                .map(|peer| peer.id)
                .filter(|&id| id != self.local_id)
                .collect(),
            None => Vec::new(),
        }
    }

    fn send_frame_to_all(&mut self, bytes: &[u8]) {
        for peer in self.broadcast_targets() {
            if !self.transport.send(peer, bytes) {
                log::warn!("broadcast to {peer} failed");
            }
        }
    }

    pub(crate) fn send_to_one(
        &mut self,
        peer: PeerId,
        tag: PacketTag,
        payload: &[u8],
    ) -> Result<(), NetError> {
        if peer == self.local_id {
            return Ok(());
        }
        let mut writer = self.pool.writer();
        writer.write_tag(tag);
        writer.write_raw(payload);
        let delivered = self.transport.send(peer, writer.as_slice());
        self.pool.recycle_writer(writer);
        if delivered {
            Ok(())
        } else {
            Err(NetError::SendFailed(peer))
        }
    }

    pub(crate) fn send_to_all(&mut self, tag: PacketTag, payload: &[u8]) {
        let targets = self.broadcast_targets();
        let mut writer = self.pool.writer();
        writer.write_tag(tag);
        writer.write_raw(payload);
        for peer in targets {
            if !self.transport.send(peer, writer.as_slice()) {
                log::warn!("broadcast to {peer} failed");
            }
        }
        self.pool.recycle_writer(writer);
    }

    /// Broadcast a global RPC. With `echo` set, the payload is also run
    /// through the local handler so the sender observes its own call.
    pub fn send_rpc(&mut self, rpc: RpcType, payload: &[u8], echo: bool) -> Result<(), NetError> {
        if self.lobby.is_none() {
            return Err(NetError::NotInLobby);
        }
        let mut body = Vec::with_capacity(payload.len() + 1);
        body.push(rpc as u8);
        body.extend_from_slice(payload);
        self.send_to_all(PacketTag::Rpc, &body);
        if echo {
            let mut reader = PacketReader::from_bytes(payload);
            self.dispatch_rpc(rpc, self.local_id, &mut reader)?;
        }
        Ok(())
    }

    /// Broadcast a per-object RPC, optionally running it through the local
    /// handler as well.
    pub fn send_object_rpc(
        &mut self,
        net_id: NetworkId,
        rpc_id: u8,
        payload: &[u8],
        echo: bool,
    ) -> Result<(), NetError> {
        if !self
            .lobby
            .as_ref()
            .ok_or(NetError::NotInLobby)?
            .objects()
            .contains(net_id)
        {
            return Err(NetError::MissingObject(net_id));
        }
        let mut body = Vec::with_capacity(payload.len() + 5);
        body.push(rpc_id);
        body.extend_from_slice(&net_id.to_le_bytes());
        body.extend_from_slice(payload);
        self.send_to_all(PacketTag::ObjectRpc, &body);
        if !echo {
            return Ok(());
        }

        let mut reader = PacketReader::from_bytes(payload);
        let lobby = self.lobby.as_mut().ok_or(NetError::NotInLobby)?;
        let object = lobby
            .objects
            .get_mut(net_id)
            .ok_or(NetError::MissingObject(net_id))?;
        object.handle_rpc(self.local_id, rpc_id, &mut reader, self.hooks.as_mut())
    }

    /// Register a locally-owned object and announce it. Returns the minted
    /// network id.
    pub fn spawn(&mut self, body: Body) -> Result<NetworkId, NetError> {
        let mut writer = self.pool.writer();
        writer.write_tag(PacketTag::Spawn);
        let Some(lobby) = self.lobby.as_mut() else {
            self.pool.recycle_writer(writer);
            return Err(NetError::NotInLobby);
        };
        let net_id = lobby.objects.allocate();
        let mut object = ReplicatedObject::new(net_id, self.local_id, body);
        object.mark_spawned();
        writer.write_u32(net_id);
        writer.write_u64(self.local_id);
        writer.write_u8(object.kind() as u8);
        object.write_init(&mut writer);
        lobby.objects.insert(object)?;

        if let Some(object) = self
            .lobby
            .as_ref()
            .and_then(|lobby| lobby.objects().get(net_id))
        {
            self.hooks.on_object_spawned(object);
        }
        for peer in self.broadcast_targets() {
            if !self.transport.send(peer, writer.as_slice()) {
                log::warn!("spawn broadcast of object {net_id} to {peer} failed");
            }
        }
        self.pool.recycle_writer(writer);
        Ok(net_id)
    }

    /// Remove a locally-owned object and announce its removal.
    pub fn despawn(&mut self, net_id: NetworkId) -> Result<(), NetError> {
        let Some(lobby) = self.lobby.as_mut() else {
            return Err(NetError::NotInLobby);
        };
        let Some(object) = lobby.objects.get(net_id) else {
            return Err(NetError::MissingObject(net_id));
        };
        if object.owner() != self.local_id {
            return Err(NetError::NotOwner(net_id));
        }
        lobby.objects.remove(net_id);
        self.hooks.on_object_despawned(net_id);
        self.send_to_all(PacketTag::Despawn, &net_id.to_le_bytes());
        Ok(())
    }

    /// Replay a spawn for every live object to a late joiner. Receivers drop
    /// ids they already know, so replay is idempotent.
    pub(crate) fn resync_objects_to(&mut self, peer: PeerId) {
        let Some(lobby) = self.lobby.as_ref() else {
            return;
        };
        let mut writer = self.pool.writer();
        for object in lobby.objects().iter() {
            writer.clear();
            writer.write_tag(PacketTag::Spawn);
            writer.write_u32(object.net_id());
            writer.write_u64(object.owner());
            writer.write_u8(object.kind() as u8);
            object.write_init(&mut writer);
            if !self.transport.send(peer, writer.as_slice()) {
                log::warn!("spawn replay of object {} to {peer} failed", object.net_id());
            }
        }
        self.pool.recycle_writer(writer);
        log::debug!("replayed {} spawns to {peer}", lobby.objects().len());
    }

    /// Host-side push of the authoritative lobby snapshot.
    pub(crate) fn broadcast_lobby_data(&mut self) {
        let Some(lobby) = self.lobby.as_ref() else {
            return;
        };
        let targets: Vec<PeerId> = lobby
            .peers()
            .map(|peer| peer.id)
            .filter(|&id| id != self.local_id)
            .collect();
        let mut writer = self.pool.writer();
        writer.write_tag(PacketTag::Rpc);
        writer.write_u8(RpcType::LobbyData as u8);
        lobby.encode_peers(&mut writer);
        for peer in targets {
            if !self.transport.send(peer, writer.as_slice()) {
                log::warn!("lobby snapshot to {peer} failed");
            }
        }
        self.pool.recycle_writer(writer);
    }
}
