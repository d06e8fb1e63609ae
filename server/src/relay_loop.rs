use crate::config::ServerConfig;
use crate::protocol::{ClientMsg, Delivery, ParticipantId};
use crate::state::{RelayState, RouteError};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Commands from client connections to the relay loop
#[derive(Debug)]
pub enum RelayCommand {
    /// Register a new connection. The reply carries its id; the `init`
    /// snapshot follows on the broadcast channel.
    Join {
        name: Option<String>,
        response: oneshot::Sender<ParticipantId>,
    },
    Leave {
        id: ParticipantId,
    },
    /// A parsed message, tagged with the connection it arrived on.
    Client {
        sender: ParticipantId,
        msg: ClientMsg,
    },
}

/// Run the relay loop. Owns all relay state.
///
/// Commands are processed one at a time, in arrival order, and every
/// delivery a command produces is published before the next one is read.
pub async fn run_relay_loop(
    mut cmd_rx: mpsc::Receiver<RelayCommand>,
    broadcast_tx: broadcast::Sender<Delivery>,
    config: ServerConfig,
) {
    let mut state = RelayState::new(config.rules, config.throw_cooldown());

    let mut stats_interval = tokio::time::interval(config.stats_interval);
    stats_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stats_interval.tick() => {
                tracing::debug!(
                    "Relay stats: {} participants, {} balls in flight",
                    state.participants().len(),
                    state.projectiles().len()
                );
            }

            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                for delivery in apply_command(&mut state, cmd) {
                    // Err only means nobody is subscribed right now
                    let _ = broadcast_tx.send(delivery);
                }
            }
        }
    }

    tracing::info!("Relay loop ended");
}

/// Apply one command to the state and return what must be delivered.
pub fn apply_command(state: &mut RelayState, cmd: RelayCommand) -> Vec<Delivery> {
    match cmd {
        RelayCommand::Join { name, response } => {
            let (id, deliveries) = state.join(Instant::now(), name);
            if response.send(id).is_err() {
                // Connection went away before learning its id
                tracing::warn!("Participant {} vanished during join", id);
                let mut deliveries = deliveries;
                deliveries.extend(state.leave(id));
                return deliveries;
            }
            deliveries
        }
        RelayCommand::Leave { id } => state.leave(id),
        RelayCommand::Client { sender, msg } => {
            match state.handle(sender, msg, Instant::now()) {
                Ok(deliveries) => deliveries,
                Err(e @ RouteError::UnknownSender(_)) => {
                    tracing::debug!("Dropped message: {}", e);
                    vec![]
                }
                Err(e) => {
                    tracing::warn!("Rejected message from participant {}: {}", sender, e);
                    vec![]
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        vec3, BallRef, BallThrownIn, GameRules, Rotation, ServerMsg, Target,
    };

    fn join(state: &mut RelayState) -> (ParticipantId, Vec<Delivery>) {
        let (tx, mut rx) = oneshot::channel();
        let out = apply_command(state, RelayCommand::Join { name: None, response: tx });
        (rx.try_recv().expect("join reply"), out)
    }

    fn throw_cmd(sender: ParticipantId, vy: f64) -> RelayCommand {
        RelayCommand::Client {
            sender,
            msg: ClientMsg::BallThrown(BallThrownIn {
                position: vec3(0.0, 1.0, 0.0),
                rotation: Rotation::default(),
                velocity: vec3(0.0, vy, -3.0),
                initial_position: None,
                client_ref: Some("mine".to_string()),
            }),
        }
    }

    #[test]
    fn join_replies_with_id_and_targets_init() {
        let mut state = RelayState::new(GameRules::default(), None);
        let (id, out) = join(&mut state);
        assert_eq!(out[0].target, Target::Only(id));
        assert!(matches!(out[0].msg, ServerMsg::Init(_)));
    }

    #[test]
    fn join_with_dropped_receiver_is_rolled_back() {
        let mut state = RelayState::new(GameRules::default(), None);
        let (tx, rx) = oneshot::channel();
        drop(rx);
        let out = apply_command(&mut state, RelayCommand::Join { name: None, response: tx });
        assert!(state.participants().is_empty());
        assert!(out
            .iter()
            .any(|d| matches!(d.msg, ServerMsg::PlayerDisconnected(_))));
    }

    #[test]
    fn rejected_messages_produce_nothing() {
        let mut state = RelayState::new(GameRules::default(), None);
        let (id, _) = join(&mut state);
        assert!(apply_command(&mut state, throw_cmd(id, 500.0)).is_empty());
        assert!(apply_command(&mut state, throw_cmd(id + 10, 5.0)).is_empty());
        assert!(state.projectiles().is_empty());
    }

    #[test]
    fn throw_echoes_client_ref() {
        let mut state = RelayState::new(GameRules::default(), None);
        let (id, _) = join(&mut state);
        let out = apply_command(&mut state, throw_cmd(id, 5.0));
        match &out[0].msg {
            ServerMsg::BallThrown(ball) => assert_eq!(ball.client_ref.as_deref(), Some("mine")),
            other => panic!("Expected BallThrown, got {:?}", other),
        }
    }

    #[test]
    fn leave_then_catch_is_silent() {
        let mut state = RelayState::new(GameRules::default(), None);
        let (a, _) = join(&mut state);
        let (b, _) = join(&mut state);
        apply_command(&mut state, throw_cmd(a, 5.0));
        let out = apply_command(&mut state, RelayCommand::Leave { id: a });
        assert_eq!(out.len(), 2);

        let late = apply_command(
            &mut state,
            RelayCommand::Client {
                sender: b,
                msg: ClientMsg::BallCaught(BallRef { id: 1 }),
            },
        );
        assert!(late.is_empty());
    }

    #[tokio::test]
    async fn loop_publishes_in_command_order() {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (broadcast_tx, mut broadcast_rx) = broadcast::channel(16);
        let handle = tokio::spawn(run_relay_loop(
            cmd_rx,
            broadcast_tx,
            ServerConfig::default(),
        ));

        let (tx, rx) = oneshot::channel();
        cmd_tx.send(RelayCommand::Join { name: None, response: tx }).await.unwrap();
        let id = rx.await.unwrap();
        cmd_tx.send(throw_cmd(id, 5.0)).await.unwrap();
        cmd_tx.send(RelayCommand::Leave { id }).await.unwrap();

        let mut kinds = Vec::new();
        for _ in 0..5 {
            let delivery = broadcast_rx.recv().await.unwrap();
            kinds.push(match delivery.msg {
                ServerMsg::Init(_) => "init",
                ServerMsg::NewUser(_) => "newUser",
                ServerMsg::BallThrown(_) => "ballThrown",
                ServerMsg::BallRemoved(_) => "ballRemoved",
                ServerMsg::PlayerDisconnected(_) => "playerDisconnected",
                _ => "other",
            });
        }
        assert_eq!(
            kinds,
            vec!["init", "newUser", "ballThrown", "ballRemoved", "playerDisconnected"]
        );

        drop(cmd_tx);
        handle.await.unwrap();
    }
}
