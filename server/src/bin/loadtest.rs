//! Load test for the catch relay.
//!
//! Spawns multiple fake players that:
//! - Connect to the relay (named `bot-N`) and wait for `init`
//! - Wander around, sending playerUpdate at a fixed rate
//! - Periodically throw a ball
//! - Catch or drop balls thrown by others
//!
//! Usage: cargo run --bin loadtest -- [OPTIONS]
//!
//! Options:
//!   --clients N       Number of fake players to spawn (default: 50)
//!   --duration S      Test duration in seconds (default: 30)
//!   --update-rate R   playerUpdate messages per second per player (default: 10)
//!   --throw-rate R    Throws per second per player (default: 0.2)
//!   --catch-chance P  Probability of catching a peer's ball (default: 0.5)
//!   --churn S         Disconnect after S seconds, reconnect 5s later (default: 0, off)
//!   --url URL         Relay URL (default: ws://127.0.0.1:3000/ws)

use catch_relay::protocol::{
    vec3, Action, BallRef, BallThrownIn, ClientMsg, PlayerUpdateIn, Rotation, ServerMsg,
};
use futures_util::{SinkExt, StreamExt};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

// === Options ===

#[derive(Debug, Clone)]
struct Options {
    clients: u32,
    duration_secs: u64,
    update_rate: f64,
    throw_rate: f64,
    catch_chance: f64,
    churn_secs: u64,
    url: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            clients: 50,
            duration_secs: 30,
            update_rate: 10.0,
            throw_rate: 0.2,
            catch_chance: 0.5,
            churn_secs: 0,
            url: "ws://127.0.0.1:3000/ws".to_string(),
        }
    }
}

fn parse_args() -> Options {
    let args: Vec<String> = std::env::args().collect();
    let mut opts = Options::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--clients" => {
                i += 1;
                opts.clients = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(50);
            }
            "--duration" => {
                i += 1;
                opts.duration_secs = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(30);
            }
            "--update-rate" => {
                i += 1;
                opts.update_rate = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(10.0);
            }
            "--throw-rate" => {
                i += 1;
                opts.throw_rate = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(0.2);
            }
            "--catch-chance" => {
                i += 1;
                opts.catch_chance = args
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0.5_f64)
                    .clamp(0.0, 1.0);
            }
            "--churn" => {
                i += 1;
                opts.churn_secs = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(10);
            }
            "--url" => {
                i += 1;
                opts.url = args.get(i).cloned().unwrap_or(opts.url);
            }
            _ => {}
        }
        i += 1;
    }
    opts
}

fn interval_for(rate: f64) -> Duration {
    if rate > 0.0 {
        Duration::from_secs_f64(1.0 / rate)
    } else {
        Duration::from_secs(3600) // Effectively never
    }
}

// === Metrics ===

#[derive(Default)]
struct Metrics {
    connected: AtomicU64,
    messages_received: AtomicU64,
    player_updates_received: AtomicU64,
    updates_sent: AtomicU64,
    throws_sent: AtomicU64,
    catches_sent: AtomicU64,
    ground_touches_sent: AtomicU64,
    balls_thrown_seen: AtomicU64,
    catch_updates_seen: AtomicU64,
    sessions: AtomicU64,
    errors: AtomicU64,
    latency_sum_ms: AtomicU64,
    latency_count: AtomicU64,
}

// === Fake player ===

/// Random walker inside a 20x20 field.
struct Walker {
    x: f64,
    z: f64,
    heading: f64,
}

impl Walker {
    fn new(rng: &mut ChaCha8Rng) -> Self {
        Self {
            x: rng.gen_range(-10.0..10.0),
            z: rng.gen_range(-10.0..10.0),
            heading: rng.gen_range(0.0..std::f64::consts::TAU),
        }
    }

    fn step(&mut self, rng: &mut ChaCha8Rng, dt: f64) -> ClientMsg {
        self.heading += rng.gen_range(-0.5..0.5);
        let running = rng.gen_bool(0.7);
        if running {
            let speed = 4.0;
            self.x = (self.x + self.heading.sin() * speed * dt).clamp(-10.0, 10.0);
            self.z = (self.z + self.heading.cos() * speed * dt).clamp(-10.0, 10.0);
        }
        ClientMsg::PlayerUpdate(PlayerUpdateIn {
            position: vec3(self.x, 0.0, self.z),
            rotation: Rotation::yaw(self.heading),
            action: if running { Action::Run } else { Action::Idle },
        })
    }

    fn throw(&self, rng: &mut ChaCha8Rng, seq: u64) -> ClientMsg {
        let power = rng.gen_range(5.0..20.0);
        let origin = vec3(self.x, 1.5, self.z);
        ClientMsg::BallThrown(BallThrownIn {
            position: origin,
            rotation: Rotation::yaw(self.heading),
            velocity: vec3(
                self.heading.sin() * power,
                power * 0.5,
                self.heading.cos() * power,
            ),
            initial_position: Some(origin),
            client_ref: Some(format!("lt-{}", seq)),
        })
    }
}

/// Pause between a churned disconnect and the reconnect.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

async fn run_client(client_id: u32, opts: Options, metrics: Arc<Metrics>) {
    let test_end = Instant::now() + Duration::from_secs(opts.duration_secs);
    let mut session: u64 = 0;

    loop {
        let session_end = if opts.churn_secs > 0 {
            (Instant::now() + Duration::from_secs(opts.churn_secs)).min(test_end)
        } else {
            test_end
        };
        run_session(client_id, session, session_end, &opts, &metrics).await;
        session += 1;

        if opts.churn_secs == 0 || Instant::now() + RECONNECT_DELAY >= test_end {
            break;
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// One connection, from connect until `session_end` or the socket drops.
async fn run_session(
    client_id: u32,
    session: u64,
    session_end: Instant,
    opts: &Options,
    metrics: &Metrics,
) {
    let connect_start = Instant::now();

    let url = format!("{}?name=bot-{}", opts.url, client_id);
    let (mut ws, _) = match connect_async(url).await {
        Ok(conn) => conn,
        Err(e) => {
            if client_id < 5 {
                eprintln!("Client {} failed to connect: {}", client_id, e);
            }
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    let connect_latency = connect_start.elapsed();
    metrics
        .latency_sum_ms
        .fetch_add(connect_latency.as_millis() as u64, Ordering::Relaxed);
    metrics.latency_count.fetch_add(1, Ordering::Relaxed);
    metrics.connected.fetch_add(1, Ordering::Relaxed);
    metrics.sessions.fetch_add(1, Ordering::Relaxed);

    // Wait for init before doing anything else
    let init = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    metrics.messages_received.fetch_add(1, Ordering::Relaxed);
                    if let Ok(ServerMsg::Init(init)) = serde_json::from_str::<ServerMsg>(&text) {
                        return Some(init.user_id);
                    }
                }
                Ok(Message::Close(frame)) => {
                    if client_id < 3 {
                        eprintln!("Client {} closed during init: {:?}", client_id, frame);
                    }
                    return None;
                }
                Err(e) => {
                    if client_id < 3 {
                        eprintln!("Client {} error during init: {}", client_id, e);
                    }
                    return None;
                }
                _ => {}
            }
        }
        None
    })
    .await;

    let my_id = match init {
        Ok(Some(id)) => id,
        _ => {
            if client_id < 3 {
                eprintln!("Client {} never got init", client_id);
            }
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            metrics.connected.fetch_sub(1, Ordering::Relaxed);
            return;
        }
    };
    if client_id < 3 {
        eprintln!(
            "Client {} joined as participant {} (session {})",
            client_id, my_id, session
        );
    }

    let mut rng = ChaCha8Rng::seed_from_u64(((client_id as u64) << 32) | session);
    let mut walker = Walker::new(&mut rng);

    let update_every = interval_for(opts.update_rate);
    let mut update_timer = tokio::time::interval(update_every);
    update_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut throw_timer = tokio::time::interval(interval_for(opts.throw_rate));
    throw_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut throws: u64 = 0;

    loop {
        if Instant::now() >= session_end {
            break;
        }

        let outgoing = tokio::select! {
            _ = update_timer.tick() => {
                Some((walker.step(&mut rng, update_every.as_secs_f64()), &metrics.updates_sent))
            }

            _ = throw_timer.tick() => {
                throws += 1;
                Some((walker.throw(&mut rng, throws), &metrics.throws_sent))
            }

            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        metrics.messages_received.fetch_add(1, Ordering::Relaxed);
                        match serde_json::from_str::<ServerMsg>(&text) {
                            Ok(ServerMsg::PlayerUpdate(_)) => {
                                metrics.player_updates_received.fetch_add(1, Ordering::Relaxed);
                                None
                            }
                            Ok(ServerMsg::BallThrown(ball)) => {
                                metrics.balls_thrown_seen.fetch_add(1, Ordering::Relaxed);
                                if ball.thrower == my_id {
                                    None
                                } else if rng.gen_bool(opts.catch_chance) {
                                    Some((
                                        ClientMsg::BallCaught(BallRef { id: ball.id }),
                                        &metrics.catches_sent,
                                    ))
                                } else {
                                    Some((
                                        ClientMsg::GroundTouch(BallRef { id: ball.id }),
                                        &metrics.ground_touches_sent,
                                    ))
                                }
                            }
                            Ok(ServerMsg::CatchUpdate(_)) => {
                                metrics.catch_updates_seen.fetch_add(1, Ordering::Relaxed);
                                None
                            }
                            Ok(_) => None,
                            Err(e) => {
                                if client_id < 3 {
                                    eprintln!("Client {} got unparseable message: {}", client_id, e);
                                }
                                metrics.errors.fetch_add(1, Ordering::Relaxed);
                                None
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if client_id < 3 {
                            eprintln!("Client {} got Close: {:?}", client_id, frame);
                        }
                        break;
                    }
                    None => break,
                    Some(Err(e)) => {
                        if client_id < 3 {
                            eprintln!("Client {} error: {}", client_id, e);
                        }
                        metrics.errors.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                    Some(_) => None,
                }
            }
        };

        let Some((msg, counter)) = outgoing else {
            continue;
        };
        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(_) => {
                metrics.errors.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };
        if ws.send(Message::Text(json.into())).await.is_ok() {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            break;
        }
    }

    let _ = ws.close(None).await;
    metrics.connected.fetch_sub(1, Ordering::Relaxed);
}

// === Main ===

#[tokio::main]
async fn main() {
    let opts = parse_args();

    println!("=== Catch Relay Load Test ===");
    println!("Clients: {}", opts.clients);
    println!("Duration: {}s", opts.duration_secs);
    println!("Update rate: {}/s per player", opts.update_rate);
    println!("Throw rate: {}/s per player", opts.throw_rate);
    println!("Catch chance: {}", opts.catch_chance);
    if opts.churn_secs > 0 {
        println!(
            "Churn: reconnect every {}s (+{}s pause)",
            opts.churn_secs,
            RECONNECT_DELAY.as_secs()
        );
    }
    println!("URL: {}", opts.url);
    println!();

    let metrics = Arc::new(Metrics::default());

    let mut handles = Vec::with_capacity(opts.clients as usize);

    println!("Spawning {} clients...", opts.clients);
    let spawn_start = Instant::now();

    for client_id in 0..opts.clients {
        let opts = opts.clone();
        let metrics = Arc::clone(&metrics);

        handles.push(tokio::spawn(async move {
            run_client(client_id, opts, metrics).await;
        }));

        // Stagger spawns slightly to avoid thundering herd
        if client_id % 50 == 49 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    println!("All clients spawned in {:?}", spawn_start.elapsed());
    println!();

    // Print stats periodically
    let metrics_clone = Arc::clone(&metrics);
    let duration_secs = opts.duration_secs;
    let stats_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        let start = Instant::now();

        loop {
            interval.tick().await;
            let elapsed = start.elapsed().as_secs();
            if elapsed >= duration_secs + 5 {
                break;
            }

            println!(
                "[{:3}s] connected={}, sessions={}, msgs={}, updates_sent={}, throws={}, catches={}, drops={}, errors={}",
                elapsed,
                metrics_clone.connected.load(Ordering::Relaxed),
                metrics_clone.sessions.load(Ordering::Relaxed),
                metrics_clone.messages_received.load(Ordering::Relaxed),
                metrics_clone.updates_sent.load(Ordering::Relaxed),
                metrics_clone.throws_sent.load(Ordering::Relaxed),
                metrics_clone.catches_sent.load(Ordering::Relaxed),
                metrics_clone.ground_touches_sent.load(Ordering::Relaxed),
                metrics_clone.errors.load(Ordering::Relaxed),
            );
        }
    });

    // Wait for all clients to finish
    for handle in handles {
        let _ = handle.await;
    }

    stats_handle.abort();

    // Final stats
    println!();
    println!("=== Final Results ===");
    let msgs = metrics.messages_received.load(Ordering::Relaxed);
    let updates_sent = metrics.updates_sent.load(Ordering::Relaxed);
    let updates_received = metrics.player_updates_received.load(Ordering::Relaxed);
    let throws = metrics.throws_sent.load(Ordering::Relaxed);
    let balls_seen = metrics.balls_thrown_seen.load(Ordering::Relaxed);
    let latency_sum = metrics.latency_sum_ms.load(Ordering::Relaxed);
    let latency_count = metrics.latency_count.load(Ordering::Relaxed);

    println!("Total messages received: {}", msgs);
    println!("Total playerUpdate sent: {}", updates_sent);
    println!("Total playerUpdate received: {}", updates_received);
    println!("Total ballThrown sent: {}", throws);
    println!("Total ballThrown seen: {}", balls_seen);
    println!(
        "Total ballCaught sent: {}",
        metrics.catches_sent.load(Ordering::Relaxed)
    );
    println!(
        "Total groundTouch sent: {}",
        metrics.ground_touches_sent.load(Ordering::Relaxed)
    );
    println!(
        "Total catchUpdate seen: {}",
        metrics.catch_updates_seen.load(Ordering::Relaxed)
    );
    println!("Total sessions: {}", metrics.sessions.load(Ordering::Relaxed));
    println!("Total errors: {}", metrics.errors.load(Ordering::Relaxed));

    if latency_count > 0 {
        println!("Average connect latency: {}ms", latency_sum / latency_count);
    }

    let msgs_per_sec = msgs as f64 / opts.duration_secs.max(1) as f64;
    println!();
    println!("Messages/sec (total): {:.0}", msgs_per_sec);

    // Every update should reach every other connected player
    let peers = opts.clients.saturating_sub(1) as f64;
    if updates_sent > 0 && peers > 0.0 {
        let fanout = updates_received as f64 / (updates_sent as f64 * peers) * 100.0;
        println!("playerUpdate fan-out delivery: {:.1}%", fanout);
    }
}
