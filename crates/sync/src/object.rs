use std::collections::HashMap;

use bitflags::bitflags;

use crate::codec::{CodecError, PacketReader, PacketWriter};
use crate::error::NetError;
use crate::hooks::GameHooks;
use crate::protocol::{NetworkId, PeerId};

/// Wire discriminator for replicated bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectKind {
    Bare = 0,
    Unit = 1,
    Projectile = 2,
}

impl ObjectKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ObjectKind::Bare),
            1 => Some(ObjectKind::Unit),
            2 => Some(ObjectKind::Projectile),
            _ => None,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UnitDirty: u32 {
        const GRID = 1 << 0;
        const POSITION = 1 << 1;
        const HEALTH = 1 << 2;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProjectileDirty: u32 {
        const POSITION = 1 << 0;
        const VELOCITY = 1 << 1;
        const DAMAGE = 1 << 2;
        const LIVE = 1 << 3;
    }
}

/// Dirty bit for the opaque-blob body.
pub const BARE_DIRTY_BLOB: u32 = 1 << 0;

/// Per-object RPC ids. A separate numbering space from the global RpcType
/// table, used for low-frequency one-shot events.
pub const OBJ_RPC_IMPACT: u8 = 0;
pub const OBJ_RPC_DAMAGE: u8 = 1;

/// Grid occupant (plant/zombie analog): board cell plus fine position and
/// health. The sync layer only moves the numbers; meaning lives in the game.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitBody {
    pub unit_type: u8,
    pub grid_x: i32,
    pub grid_y: i32,
    pub pos: (f32, f32),
    pub health: i32,
}

impl UnitBody {
    fn write_init(&self, writer: &mut PacketWriter) {
        writer.write_u8(self.unit_type);
        writer.write_i32(self.grid_x);
        writer.write_i32(self.grid_y);
        writer.write_vec2(self.pos.0, self.pos.1);
        writer.write_i32(self.health);
    }

    fn read_init(reader: &mut PacketReader) -> Result<Self, CodecError> {
        Ok(Self {
            unit_type: reader.read_u8()?,
            grid_x: reader.read_i32()?,
            grid_y: reader.read_i32()?,
            pos: reader.read_vec2()?,
            health: reader.read_i32()?,
        })
    }

    // Delta encode/decode share one conditional order; the format is
    // positional, so any asymmetry here is a silent protocol desync.
    fn write_delta(&self, writer: &mut PacketWriter, mask: UnitDirty) {
        if mask.contains(UnitDirty::GRID) {
            writer.write_i32(self.grid_x);
            writer.write_i32(self.grid_y);
        }
        if mask.contains(UnitDirty::POSITION) {
            writer.write_vec2(self.pos.0, self.pos.1);
        }
        if mask.contains(UnitDirty::HEALTH) {
            writer.write_i32(self.health);
        }
    }

    fn apply_delta(&mut self, reader: &mut PacketReader, mask: UnitDirty) -> Result<(), CodecError> {
        if mask.contains(UnitDirty::GRID) {
            self.grid_x = reader.read_i32()?;
            self.grid_y = reader.read_i32()?;
        }
        if mask.contains(UnitDirty::POSITION) {
            self.pos = reader.read_vec2()?;
        }
        if mask.contains(UnitDirty::HEALTH) {
            self.health = reader.read_i32()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectileBody {
    pub pos: (f32, f32),
    pub vel: (f32, f32),
    pub damage: i32,
    pub live: bool,
}

impl ProjectileBody {
    fn write_init(&self, writer: &mut PacketWriter) {
        writer.write_vec2(self.pos.0, self.pos.1);
        writer.write_vec2(self.vel.0, self.vel.1);
        writer.write_i32(self.damage);
        writer.write_bool(self.live);
    }

    fn read_init(reader: &mut PacketReader) -> Result<Self, CodecError> {
        Ok(Self {
            pos: reader.read_vec2()?,
            vel: reader.read_vec2()?,
            damage: reader.read_i32()?,
            live: reader.read_bool()?,
        })
    }

    fn write_delta(&self, writer: &mut PacketWriter, mask: ProjectileDirty) {
        if mask.contains(ProjectileDirty::POSITION) {
            writer.write_vec2(self.pos.0, self.pos.1);
        }
        if mask.contains(ProjectileDirty::VELOCITY) {
            writer.write_vec2(self.vel.0, self.vel.1);
        }
        if mask.contains(ProjectileDirty::DAMAGE) {
            writer.write_i32(self.damage);
        }
        if mask.contains(ProjectileDirty::LIVE) {
            writer.write_bool(self.live);
        }
    }

    fn apply_delta(
        &mut self,
        reader: &mut PacketReader,
        mask: ProjectileDirty,
    ) -> Result<(), CodecError> {
        if mask.contains(ProjectileDirty::POSITION) {
            self.pos = reader.read_vec2()?;
        }
        if mask.contains(ProjectileDirty::VELOCITY) {
            self.vel = reader.read_vec2()?;
        }
        if mask.contains(ProjectileDirty::DAMAGE) {
            self.damage = reader.read_i32()?;
        }
        if mask.contains(ProjectileDirty::LIVE) {
            self.live = reader.read_bool()?;
        }
        Ok(())
    }
}

/// Closed sum of replicated payloads. Dispatch is a match on the
/// discriminant, not virtual calls.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Opaque game-state blob for types the sync layer has no schema for.
    Bare(Vec<u8>),
    Unit(UnitBody),
    Projectile(ProjectileBody),
}

impl Body {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Body::Bare(_) => ObjectKind::Bare,
            Body::Unit(_) => ObjectKind::Unit,
            Body::Projectile(_) => ObjectKind::Projectile,
        }
    }

    fn read_init(kind: ObjectKind, reader: &mut PacketReader) -> Result<Self, CodecError> {
        Ok(match kind {
            ObjectKind::Bare => Body::Bare(reader.read_bytes()?),
            ObjectKind::Unit => Body::Unit(UnitBody::read_init(reader)?),
            ObjectKind::Projectile => Body::Projectile(ProjectileBody::read_init(reader)?),
        })
    }
}

/// One unit of replicated state. Exactly one peer (the owner) authors state
/// changes and sync packets for a given network id; everyone else applies.
#[derive(Debug)]
pub struct ReplicatedObject {
    net_id: NetworkId,
    owner: PeerId,
    dirty: u32,
    spawned: bool,
    body: Body,
}

impl ReplicatedObject {
    pub(crate) fn new(net_id: NetworkId, owner: PeerId, body: Body) -> Self {
        Self {
            net_id,
            owner,
            dirty: 0,
            spawned: false,
            body,
        }
    }

    pub fn net_id(&self) -> NetworkId {
        self.net_id
    }

    pub fn owner(&self) -> PeerId {
        self.owner
    }

    pub fn kind(&self) -> ObjectKind {
        self.body.kind()
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Mutating the body does not mark anything dirty; the owning game code
    /// pairs its writes with `set_dirty`.
    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub fn is_spawned(&self) -> bool {
        self.spawned
    }

    pub(crate) fn mark_spawned(&mut self) {
        self.spawned = true;
    }

    pub fn dirty_mask(&self) -> u32 {
        self.dirty
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty != 0
    }

    pub fn set_dirty(&mut self, bits: u32) {
        self.dirty |= bits;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = 0;
    }

    pub(crate) fn write_init(&self, writer: &mut PacketWriter) {
        match &self.body {
            Body::Bare(blob) => writer.write_bytes(blob),
            Body::Unit(unit) => unit.write_init(writer),
            Body::Projectile(projectile) => projectile.write_init(writer),
        }
    }

    pub(crate) fn write_delta(&self, writer: &mut PacketWriter) {
        match &self.body {
            Body::Bare(blob) => {
                if self.dirty & BARE_DIRTY_BLOB != 0 {
                    writer.write_bytes(blob);
                }
            }
            Body::Unit(unit) => {
                unit.write_delta(writer, UnitDirty::from_bits_truncate(self.dirty));
            }
            Body::Projectile(projectile) => {
                projectile.write_delta(writer, ProjectileDirty::from_bits_truncate(self.dirty));
            }
        }
    }

    pub(crate) fn apply_delta(
        &mut self,
        reader: &mut PacketReader,
        mask: u32,
    ) -> Result<(), CodecError> {
        match &mut self.body {
            Body::Bare(blob) => {
                if mask & BARE_DIRTY_BLOB != 0 {
                    *blob = reader.read_bytes()?;
                }
                Ok(())
            }
            Body::Unit(unit) => unit.apply_delta(reader, UnitDirty::from_bits_truncate(mask)),
            Body::Projectile(projectile) => {
                projectile.apply_delta(reader, ProjectileDirty::from_bits_truncate(mask))
            }
        }
    }

    pub(crate) fn handle_rpc(
        &mut self,
        sender: PeerId,
        rpc_id: u8,
        reader: &mut PacketReader,
        hooks: &mut dyn GameHooks,
    ) -> Result<(), NetError> {
        match (&mut self.body, rpc_id) {
            (Body::Projectile(projectile), OBJ_RPC_IMPACT) => {
                let target = reader.read_u32()?;
                projectile.live = false;
                log::debug!(
                    "projectile {} impact on {} reported by {}",
                    self.net_id,
                    target,
                    sender
                );
                hooks.on_projectile_impact(self.net_id, target);
                Ok(())
            }
            (Body::Unit(unit), OBJ_RPC_DAMAGE) => {
                let amount = reader.read_i32()?;
                unit.health -= amount;
                Ok(())
            }
            _ => Err(NetError::UnknownObjectRpc {
                net_id: self.net_id,
                rpc_id,
            }),
        }
    }

    pub(crate) fn read_spawn(
        net_id: NetworkId,
        owner: PeerId,
        kind: ObjectKind,
        reader: &mut PacketReader,
    ) -> Result<Self, CodecError> {
        let body = Body::read_init(kind, reader)?;
        Ok(Self {
            net_id,
            owner,
            dirty: 0,
            spawned: true,
            body,
        })
    }
}

/// The id -> object registry for one lobby, plus the monotonic id counter.
/// Ids are never reused while the lobby lives.
#[derive(Debug)]
pub struct ObjectMap {
    objects: HashMap<NetworkId, ReplicatedObject>,
    next_net_id: NetworkId,
}

impl Default for ObjectMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectMap {
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            next_net_id: 1,
        }
    }

    pub(crate) fn allocate(&mut self) -> NetworkId {
        let id = self.next_net_id;
        self.next_net_id += 1;
        id
    }

    /// Keep the local counter ahead of ids minted by other peers.
    pub(crate) fn observe_remote_id(&mut self, net_id: NetworkId) {
        if net_id >= self.next_net_id {
            self.next_net_id = net_id + 1;
        }
    }

    pub(crate) fn insert(&mut self, object: ReplicatedObject) -> Result<(), NetError> {
        let net_id = object.net_id();
        if self.objects.contains_key(&net_id) {
            return Err(NetError::DuplicateObject(net_id));
        }
        self.objects.insert(net_id, object);
        Ok(())
    }

    pub(crate) fn remove(&mut self, net_id: NetworkId) -> Option<ReplicatedObject> {
        self.objects.remove(&net_id)
    }

    pub fn get(&self, net_id: NetworkId) -> Option<&ReplicatedObject> {
        self.objects.get(&net_id)
    }

    pub fn get_mut(&mut self, net_id: NetworkId) -> Option<&mut ReplicatedObject> {
        self.objects.get_mut(&net_id)
    }

    pub fn contains(&self, net_id: NetworkId) -> bool {
        self.objects.contains_key(&net_id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReplicatedObject> {
        self.objects.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ReplicatedObject> {
        self.objects.values_mut()
    }

    pub(crate) fn owned_by(&self, owner: PeerId) -> Vec<NetworkId> {
        self.objects
            .values()
            .filter(|object| object.owner() == owner)
            .map(|object| object.net_id())
            .collect()
    }

    /// Ids of spawned, dirty objects owned by `owner`, for the sync pass.
    pub(crate) fn dirty_owned_by(&self, owner: PeerId) -> Vec<NetworkId> {
        self.objects
            .values()
            .filter(|object| object.owner() == owner && object.is_spawned() && object.is_dirty())
            .map(|object| object.net_id())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_unit() -> UnitBody {
        UnitBody {
            unit_type: 3,
            grid_x: 4,
            grid_y: 2,
            pos: (320.0, 180.0),
            health: 270,
        }
    }

    #[test]
    fn test_init_roundtrip_unit() {
        let unit = sample_unit();
        let mut writer = PacketWriter::new();
        unit.write_init(&mut writer);

        let mut reader = PacketReader::from_bytes(writer.as_slice());
        let decoded = UnitBody::read_init(&mut reader).unwrap();
        assert_eq!(decoded, unit);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_delta_only_writes_dirty_fields() {
        let mut object = ReplicatedObject::new(1, 10, Body::Unit(sample_unit()));
        object.mark_spawned();
        object.set_dirty(UnitDirty::HEALTH.bits());

        let mut writer = PacketWriter::new();
        object.write_delta(&mut writer);
        // Only the i32 health field.
        assert_eq!(writer.len(), 4);

        let mut replica = ReplicatedObject::new(1, 10, Body::Unit(sample_unit()));
        if let Body::Unit(unit) = object.body_mut() {
            unit.health = 100;
        }
        let mut writer = PacketWriter::new();
        object.write_delta(&mut writer);
        let mut reader = PacketReader::from_bytes(writer.as_slice());
        replica
            .apply_delta(&mut reader, object.dirty_mask())
            .unwrap();

        if let Body::Unit(unit) = replica.body() {
            assert_eq!(unit.health, 100);
            // Untouched fields keep their values.
            assert_eq!(unit.grid_x, 4);
        } else {
            panic!("expected unit body");
        }
    }

    #[test]
    fn test_empty_mask_changes_nothing() {
        let object = ReplicatedObject::new(1, 10, Body::Unit(sample_unit()));
        let mut writer = PacketWriter::new();
        object.write_delta(&mut writer);
        assert!(writer.is_empty());

        let mut replica = ReplicatedObject::new(1, 10, Body::Unit(sample_unit()));
        let before = replica.body().clone();
        let mut reader = PacketReader::from_bytes(writer.as_slice());
        replica.apply_delta(&mut reader, 0).unwrap();
        assert_eq!(replica.body(), &before);
    }

    #[test]
    fn test_bare_blob_delta() {
        let mut object = ReplicatedObject::new(5, 1, Body::Bare(vec![1, 2, 3]));
        object.mark_spawned();
        object.set_dirty(BARE_DIRTY_BLOB);

        let mut writer = PacketWriter::new();
        object.write_delta(&mut writer);

        let mut replica = ReplicatedObject::new(5, 1, Body::Bare(Vec::new()));
        let mut reader = PacketReader::from_bytes(writer.as_slice());
        replica.apply_delta(&mut reader, BARE_DIRTY_BLOB).unwrap();
        assert_eq!(replica.body(), &Body::Bare(vec![1, 2, 3]));
    }

    #[test]
    fn test_object_rpc_impact() {
        use crate::hooks::NullHooks;

        let mut object = ReplicatedObject::new(
            9,
            1,
            Body::Projectile(ProjectileBody {
                pos: (0.0, 0.0),
                vel: (8.0, 0.0),
                damage: 20,
                live: true,
            }),
        );
        let mut writer = PacketWriter::new();
        writer.write_u32(33);
        let mut reader = PacketReader::from_bytes(writer.as_slice());
        object
            .handle_rpc(1, OBJ_RPC_IMPACT, &mut reader, &mut NullHooks)
            .unwrap();

        if let Body::Projectile(projectile) = object.body() {
            assert!(!projectile.live);
        } else {
            panic!("expected projectile body");
        }
    }

    #[test]
    fn test_object_rpc_unknown_id() {
        use crate::hooks::NullHooks;

        let mut object = ReplicatedObject::new(9, 1, Body::Bare(Vec::new()));
        let mut reader = PacketReader::from_bytes(&[]);
        assert!(matches!(
            object.handle_rpc(1, 42, &mut reader, &mut NullHooks),
            Err(NetError::UnknownObjectRpc { net_id: 9, rpc_id: 42 })
        ));
    }

    #[test]
    fn test_id_allocation_monotonic() {
        let mut map = ObjectMap::new();
        let a = map.allocate();
        let b = map.allocate();
        assert!(b > a);

        map.observe_remote_id(100);
        assert!(map.allocate() > 100);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut map = ObjectMap::new();
        let id = map.allocate();
        map.insert(ReplicatedObject::new(id, 1, Body::Bare(Vec::new())))
            .unwrap();
        assert!(matches!(
            map.insert(ReplicatedObject::new(id, 1, Body::Bare(Vec::new()))),
            Err(NetError::DuplicateObject(_))
        ));
    }
}
