//! Puck Arena
//!
//! `relay [addr]` runs the room relay. `demo` plays a scripted headless
//! match and replays the knockout. `bot <url> <name> [room]` joins a relay
//! and wanders around the platform.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use puck_arena::{
    config::GameConfig,
    core::{unix_millis, DeterministicRng, Vec3},
    game::{
        body::{detect_puck_contacts, ArcadeBody, PhysicsBody},
        events::GameEventData,
        input::{MoveIntent, TickInput},
        state::PlayerId,
    },
    network::{
        sync::{DEFAULT_MAP, DEFAULT_MODE},
        ClientConfig, ClientMessage, RelayClient, RelayServer, RoomPlayer, ServerMessage, SyncEvent,
        TransportEvent,
    },
    replay::ReplayPlayback,
    ArenaSession, INPUT_POLL_INTERVAL_MS, TICK_RATE, VERSION,
};

/// Frame step for headless play (ms).
const FRAME_MS: u64 = 1000 / TICK_RATE as u64;

/// Give up on the demo after this many frames (20 s).
const DEMO_MAX_FRAMES: u32 = 1200;

/// Bot picks a new heading this often (ms).
const BOT_TURN_INTERVAL_MS: u64 = 1500;

/// Bot asks for a rematch this long after a game ends (ms).
const BOT_REMATCH_DELAY_MS: u64 = 5000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("puck_arena=info")))
        .init();

    info!("Puck Arena v{}", VERSION);
    let config = Arc::new(GameConfig::from_env().context("loading config")?);

    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("relay") => run_relay(config, args.get(1).cloned()).await,
        Some("bot") => {
            let url = args.get(1).cloned().unwrap_or_else(|| config.network.url.clone());
            let name = args.get(2).cloned().unwrap_or_else(|| "bot".to_string());
            run_bot(config, url, name, args.get(3).cloned()).await
        }
        Some("demo") | None => run_demo(config),
        Some(other) => bail!("Unknown command '{}', expected relay, demo or bot", other),
    }
}

// =============================================================================
// RELAY
// =============================================================================

async fn run_relay(config: Arc<GameConfig>, addr: Option<String>) -> anyhow::Result<()> {
    let addr = addr.unwrap_or_else(|| config.network.bind_addr.clone());
    let server = RelayServer::new(config);

    tokio::select! {
        result = server.run(&addr) => result.context("relay stopped")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down relay");
            server.shutdown();
        }
    }
    Ok(())
}

// =============================================================================
// DEMO
// =============================================================================

fn room_player(id: &PlayerId, name: &str, player_index: usize) -> RoomPlayer {
    RoomPlayer {
        id: id.clone(),
        name: name.to_string(),
        color: ["#00ff87", "#ff006e"][player_index % 2].to_string(),
        player_index,
        ready: true,
        connected: true,
    }
}

/// Scripted match against a relayed rival: drive east off the platform,
/// wait for the replay, then play it back in slow motion.
fn run_demo(config: Arc<GameConfig>) -> anyhow::Result<()> {
    info!("=== Starting Demo Match ===");

    let me = PlayerId::from("local");
    let rival = PlayerId::from("rival");
    let roster = vec![room_player(&me, "Local", 0), room_player(&rival, "Rival", 1)];

    let mut session = ArenaSession::new(config.clone(), 12345);
    session.handle_transport(TransportEvent::Connected, 0)?;
    session.handle_server(
        ServerMessage::RoomJoined {
            room_code: "DEMO".into(),
            player_id: me.clone(),
            color: roster[0].color.clone(),
            player_index: 0,
            players: roster.clone(),
        },
        0,
    )?;
    session.handle_server(
        ServerMessage::GameStart {
            players: roster,
            selected_map: DEFAULT_MAP.into(),
            seed: 12345,
            mode: DEFAULT_MODE.into(),
        },
        0,
    )?;

    let mut body = ArcadeBody::new(config.spawn_point(0), &config.puck, &config.arena);
    let mut rival_position = config.spawn_point(1);
    let rival_velocity = Vec3::new(-1.5, 0.0, 0.0);
    let intent = MoveIntent::from_axes(1.0, 0.0);

    let mut now = 0;
    let mut sent = 0;
    let mut replay_ready = false;
    for _ in 0..DEMO_MAX_FRAMES {
        now += FRAME_MS;

        rival_position += rival_velocity * (FRAME_MS as f64 / 1000.0);
        session.handle_server(
            ServerMessage::PlayerMoved {
                player_id: rival.clone(),
                position: Some(rival_position),
                velocity: Some(rival_velocity),
                rotation: None,
            },
            now,
        )?;

        let contacts =
            detect_puck_contacts(body.transform(), [(rival_position, rival_velocity)], config.puck.radius);
        let output = session.frame(now, TickInput { intent, fire: false }, &mut body, &contacts);
        body.step(FRAME_MS as f64 / 1000.0);
        sent += output.outbound.len();

        for event in &output.events {
            match &event.data {
                GameEventData::KnockedOut { player_id } => info!("{} knocked out at {} ms", player_id, now),
                GameEventData::Respawned { position, .. } => {
                    info!("Respawned at ({:.1}, {:.1}, {:.1})", position.x, position.y, position.z)
                }
                GameEventData::DamageChanged { total, source, .. } => {
                    info!("Damage {:.1} ({:?})", total, source)
                }
                _ => {}
            }
        }

        if output.replay_ready {
            replay_ready = true;
            break;
        }
    }
    if !replay_ready {
        bail!("no knockout within {} frames", DEMO_MAX_FRAMES);
    }
    info!("Messages for the relay: {}", sent);

    let clip = session.take_replay().context("replay missing")?;
    let encoded = clip.to_bytes()?;
    info!("=== Replay: {} frames, {} ms, {} bytes ===", clip.len(), clip.duration_ms(), encoded.len());

    session.start_playback(clip);
    let mut shown = 0;
    loop {
        let Some(frame) = session.advance_playback(FRAME_MS) else {
            break;
        };
        if let Some(player) = frame.players.get(&me) {
            if shown % 30 == 0 {
                let p = player.position;
                info!("t={} ms  local at ({:.1}, {:.1}, {:.1})", frame.timestamp_ms, p.x, p.y, p.z);
            }
        }
        shown += 1;
        if session.playback().map_or(true, ReplayPlayback::is_finished) {
            break;
        }
    }
    session.finish_playback();
    info!("Played back over {} frames", shown);

    let summary = session.teardown();
    info!("Session summary: {}", serde_json::to_string(&summary)?);
    Ok(())
}

// =============================================================================
// BOT
// =============================================================================

fn send(client: &RelayClient, message: ClientMessage) {
    if let Err(err) = client.send(message) {
        warn!("Send failed: {}", err);
    }
}

/// Heading that wanders, steering back once near the edge.
fn bot_intent(rng: &mut DeterministicRng, position: Vec3, edge: f64) -> MoveIntent {
    let from_centre = position.horizontal();
    if from_centre.length() > edge {
        let home = from_centre * -1.0;
        return MoveIntent::from_axes(home.x, home.z);
    }
    let angle = rng.next_angle();
    MoveIntent::from_axes(angle.cos(), angle.sin())
}

async fn run_bot(config: Arc<GameConfig>, url: String, name: String, room: Option<String>) -> anyhow::Result<()> {
    let mut client_config = ClientConfig::from(&config.network);
    client_config.url = url;
    info!("Bot {} connecting to {}", name, client_config.url);
    let (client, mut transport) = RelayClient::spawn(client_config);

    let mut rng = DeterministicRng::from_entropy();
    let mut session = ArenaSession::new(config.clone(), rng.next_u64());
    let mut body = ArcadeBody::new(config.spawn_point(0), &config.puck, &config.arena);
    let edge = config.arena.platform_radius * 0.6;

    let mut intent = MoveIntent::default();
    let mut next_turn_ms = 0;
    let mut rematch_at = None;
    let mut last_ms = unix_millis();
    let mut ticker = tokio::time::interval(Duration::from_millis(INPUT_POLL_INTERVAL_MS));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Bot stopping");
                if let Some(leave) = session.leave_room() {
                    send(&client, leave);
                }
                break;
            }

            event = transport.recv() => {
                let Some(event) = event else {
                    warn!("Transport task ended");
                    break;
                };
                let fresh = event == TransportEvent::Connected && session.sync().session().is_none();
                let events = match session.handle_transport(event, unix_millis()) {
                    Ok(events) => events,
                    Err(err) => {
                        warn!("Relay refused: {}", err);
                        continue;
                    }
                };
                if fresh {
                    let join = match room.as_deref() {
                        Some(code) => session.join_room(code, &name),
                        None => session.quick_join(&name),
                    };
                    send(&client, join?);
                }
                let mut lost = false;
                for event in events {
                    match event {
                        SyncEvent::Joined { .. } | SyncEvent::ReturnedToLobby => {
                            send(&client, session.set_ready(true, Vec::new())?);
                        }
                        SyncEvent::GameOver { winner_id, .. } => {
                            info!("Game over, winner {:?}", winner_id);
                            rematch_at = Some(unix_millis() + BOT_REMATCH_DELAY_MS);
                        }
                        SyncEvent::ConnectionLost => lost = true,
                        _ => {}
                    }
                }
                if lost {
                    warn!("Connection lost for good");
                    break;
                }
            }

            _ = ticker.tick() => {
                let now = unix_millis();
                let dt_ms = now.saturating_sub(last_ms).min(100);
                last_ms = now;

                if rematch_at.map_or(false, |at| now >= at) {
                    rematch_at = None;
                    send(&client, session.request_rematch()?);
                    send(&client, session.set_ready(true, Vec::new())?);
                }

                let position = body.transform().position;
                if now >= next_turn_ms || position.horizontal().length() > edge {
                    intent = bot_intent(&mut rng, position, edge);
                    next_turn_ms = now + BOT_TURN_INTERVAL_MS;
                }
                let fire = rng.next_bool(0.02);

                let others: Vec<(Vec3, Vec3)> = session
                    .world()
                    .players()
                    .filter(|p| !p.is_local())
                    .map(|p| (p.position, p.velocity))
                    .collect();
                let contacts = detect_puck_contacts(body.transform(), others, config.puck.radius);

                let output = session.frame(now, TickInput { intent, fire }, &mut body, &contacts);
                body.step(dt_ms as f64 / 1000.0);
                for message in output.outbound {
                    send(&client, message);
                }
            }
        }
    }

    drop(client);
    let summary = session.teardown();
    info!("Bot summary: {}", serde_json::to_string(&summary)?);
    Ok(())
}
