use anyhow::Result;
use clap::Parser;

use lawnsync::{
    Body, CloseReason, GameHooks, GameState, LoopbackHub, MatchBoard, NetConfig, NetSession,
    NetworkId, PacketWriter, PeerId, ProjectileBody, ReplicatedObject, UnitBody, UnitDirty,
    OBJ_RPC_IMPACT,
};

#[derive(Parser)]
#[command(name = "lawnsync-demo")]
#[command(about = "Scripted two-peer lawn defense session over a loopback network")]
struct Args {
    #[arg(long, default_value = "sunflower")]
    host_name: String,

    #[arg(long, default_value = "peashooter")]
    guest_name: String,

    #[arg(long, default_value_t = 10, help = "Frames to run after the match starts")]
    frames: u32,
}

/// Logs every callback so the packet flow is visible on the console.
struct ConsoleHooks {
    label: &'static str,
}

impl GameHooks for ConsoleHooks {
    fn on_game_state(&mut self, state: GameState) {
        log::info!("[{}] game state -> {state:?}", self.label);
    }

    fn on_start_game(&mut self, selection: u8) {
        log::info!("[{}] match started with selection {selection}", self.label);
    }

    fn on_seed_chosen(&mut self, peer: PeerId, seed: u8) {
        log::info!("[{}] peer {peer} picked seed {seed}", self.label);
    }

    fn on_mow_zombie(&mut self, row: i32, target: Option<NetworkId>) {
        log::info!("[{}] mower fired on row {row}, target {target:?}", self.label);
    }

    fn on_add_ladder(&mut self, grid_x: i32, grid_y: i32) {
        log::info!("[{}] ladder placed at ({grid_x}, {grid_y})", self.label);
    }

    fn on_lobby_changed(&mut self, lobby: &lawnsync::Lobby) {
        let names: Vec<&str> = lobby.peers().map(|peer| peer.name.as_str()).collect();
        log::info!("[{}] lobby now: {names:?}", self.label);
    }

    fn on_object_spawned(&mut self, object: &ReplicatedObject) {
        log::info!(
            "[{}] object {} spawned ({:?}, owner {})",
            self.label,
            object.net_id(),
            object.kind(),
            object.owner()
        );
    }

    fn on_object_despawned(&mut self, net_id: NetworkId) {
        log::info!("[{}] object {net_id} despawned", self.label);
    }

    fn on_projectile_impact(&mut self, net_id: NetworkId, target: NetworkId) {
        log::info!("[{}] projectile {net_id} hit object {target}", self.label);
    }

    fn on_forced_leave(&mut self, reason: CloseReason) {
        log::info!("[{}] removed from lobby: {reason:?}", self.label);
    }
}

fn session(
    id: PeerId,
    name: &str,
    label: &'static str,
    hub: &LoopbackHub,
    board: &MatchBoard,
) -> NetSession {
    NetSession::new(
        name,
        Box::new(hub.endpoint(id)),
        Box::new(board.clone()),
        Box::new(ConsoleHooks { label }),
        NetConfig::default(),
    )
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let hub = LoopbackHub::new();
    let board = MatchBoard::new();
    let mut host = session(1, &args.host_name, "host", &hub, &board);
    let mut guest = session(2, &args.guest_name, "guest", &hub, &board);

    // Lobby phase: create, join by code, exchange discovery notifications.
    let code = host.create_lobby()?;
    log::info!("lobby open, join code {code}");
    guest.join_by_code(&code)?;
    host.handle_peer_joined(guest.local_id(), &args.guest_name);
    guest.handle_peer_joined(host.local_id(), &args.host_name);
    guest.pump();
    host.pump();

    guest.set_ready()?;
    host.set_ready()?;
    host.pump();
    guest.pump();

    // Seed selection and match start, driven by the host.
    host.set_game_state(GameState::ChoosingSeeds)?;
    guest.choose_seed(4)?;
    host.choose_seed(1)?;
    host.pump();
    guest.pump();
    host.start_game(0)?;
    host.set_game_state(GameState::Gameplay)?;
    guest.pump();

    // Host plants a sunflower; guest fires a pea at it.
    let plant = host.spawn(Body::Unit(UnitBody {
        unit_type: 1,
        grid_x: 2,
        grid_y: 3,
        pos: (160.0, 240.0),
        health: 300,
    }))?;
    guest.pump();

    let pea = guest.spawn(Body::Projectile(ProjectileBody {
        pos: (640.0, 240.0),
        vel: (-8.0, 0.0),
        damage: 20,
        live: true,
    }))?;
    host.pump();

    // The guest schedules a lawn mower a few frames out.
    guest.schedule(3, |hooks| hooks.on_mow_zombie(3, None));

    for frame in 0..args.frames {
        // Owner-side movement, replicated by the per-frame delta pass.
        if let Some(object) = guest.object_mut(pea) {
            if let Body::Projectile(projectile) = object.body_mut() {
                projectile.pos.0 += projectile.vel.0;
            }
            object.set_dirty(lawnsync::ProjectileDirty::POSITION.bits());
        }
        guest.pump();
        host.pump();
        log::debug!("frame {frame} complete");
    }

    // Impact: the guest reports the hit, the host applies damage.
    let mut payload = PacketWriter::new();
    payload.write_u32(plant);
    guest.send_object_rpc(pea, OBJ_RPC_IMPACT, payload.as_slice(), true)?;
    host.pump();

    if let Some(object) = host.object_mut(plant) {
        if let Body::Unit(unit) = object.body_mut() {
            unit.health -= 20;
        }
        object.set_dirty(UnitDirty::HEALTH.bits());
    }
    host.pump();
    guest.pump();

    if let Some(object) = guest.lobby().and_then(|lobby| lobby.objects().get(plant)) {
        if let Body::Unit(unit) = object.body() {
            log::info!("plant {plant} health on guest side: {}", unit.health);
        }
    }

    guest.despawn(pea)?;
    host.pump();

    host.set_game_state(GameState::GameOver)?;
    guest.pump();
    guest.leave_lobby();
    host.handle_peer_left(guest.local_id());
    host.leave_lobby();
    log::info!("session complete");
    Ok(())
}
