use crate::participant::{ConnectionRegistry, Transform};
use crate::projectile::{Launch, ProjectileRegistry};
use crate::protocol::{
    BallRemovedMsg, BallThrownIn, CatchUpdateMsg, ClientMsg, Delivery, GameRules, InitMsg,
    NewUserMsg, ParticipantId, PlayerDisconnectedMsg, PlayerUpdateIn, PlayerUpdateMsg,
    ProjectileId, ServerMsg, PROTOCOL_VERSION,
};
use std::time::{Duration, Instant};

/// Slack on the throw speed limit for float rounding in client math.
const THROW_SPEED_TOLERANCE: f64 = 1e-6;

/// Why a well-formed client message was rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RouteError {
    #[error("participant {0} is not registered")]
    UnknownSender(ParticipantId),
    #[error("{0} contains a non-finite value")]
    NonFinite(&'static str),
    #[error("throw speed {speed:.2} exceeds limit {max:.2}")]
    ThrowTooFast { speed: f64, max: f64 },
    #[error("throw cooldown still active")]
    CooldownActive,
}

/// Central relay state owned by the relay loop task.
///
/// Every handler runs to completion against `&mut self` and returns the
/// deliveries it produced; nothing here awaits.
pub struct RelayState {
    participants: ConnectionRegistry,
    projectiles: ProjectileRegistry,
    rules: GameRules,
    throw_cooldown: Option<Duration>,
    next_participant_id: ParticipantId,
}

impl RelayState {
    pub fn new(rules: GameRules, throw_cooldown: Option<Duration>) -> Self {
        Self {
            participants: ConnectionRegistry::new(),
            projectiles: ProjectileRegistry::new(),
            rules,
            throw_cooldown,
            next_participant_id: 1,
        }
    }

    pub fn participants(&self) -> &ConnectionRegistry {
        &self.participants
    }

    pub fn projectiles(&self) -> &ProjectileRegistry {
        &self.projectiles
    }

    /// Register a new connection. The joiner gets `init` (everyone else plus
    /// balls in flight), peers get `newUser`.
    pub fn join(
        &mut self,
        now: Instant,
        name: Option<String>,
    ) -> (ParticipantId, Vec<Delivery>) {
        let id = self.allocate_participant_id();
        let user = self.participants.register(id, name).to_wire(now);

        let init = InitMsg {
            protocol_version: PROTOCOL_VERSION,
            user_id: id,
            users: self
                .participants
                .snapshot_except(id)
                .into_iter()
                .map(|p| p.to_wire(now))
                .collect(),
            balls: self
                .projectiles
                .snapshot()
                .into_iter()
                .map(|p| p.to_wire())
                .collect(),
            rules: self.rules,
        };

        tracing::info!(
            "Participant {} joined ({} connected)",
            id,
            self.participants.len()
        );

        (
            id,
            vec![
                Delivery::only(id, ServerMsg::Init(init)),
                Delivery::peers_of(id, ServerMsg::NewUser(NewUserMsg { user })),
            ],
        )
    }

    /// Next free id. Skips 0 and ids still connected once the counter wraps.
    fn allocate_participant_id(&mut self) -> ParticipantId {
        loop {
            let id = self.next_participant_id;
            self.next_participant_id = id.wrapping_add(1).max(1);
            if !self.participants.contains(id) {
                return id;
            }
        }
    }

    /// Drop a connection, cascading removal of its projectile.
    pub fn leave(&mut self, id: ParticipantId) -> Vec<Delivery> {
        if self.participants.remove(id).is_none() {
            return vec![];
        }

        let mut out: Vec<Delivery> = self
            .projectiles
            .remove_all_owned_by(id)
            .into_iter()
            .map(|p| ball_removed(p.id))
            .collect();
        out.push(Delivery::peers_of(
            id,
            ServerMsg::PlayerDisconnected(PlayerDisconnectedMsg { id }),
        ));

        tracing::info!(
            "Participant {} left ({} connected, {} balls)",
            id,
            self.participants.len(),
            self.projectiles.len()
        );
        out
    }

    /// Route one inbound message from `sender`, the connection it arrived on.
    pub fn handle(
        &mut self,
        sender: ParticipantId,
        msg: ClientMsg,
        now: Instant,
    ) -> Result<Vec<Delivery>, RouteError> {
        if !self.participants.contains(sender) {
            return Err(RouteError::UnknownSender(sender));
        }
        match msg {
            ClientMsg::PlayerUpdate(update) => self.player_update(sender, update),
            ClientMsg::BallThrown(thrown) => self.throw(sender, thrown, now),
            ClientMsg::BallCaught(ball) => Ok(self.catch_ball(sender, ball.id)),
            ClientMsg::GroundTouch(ball) => Ok(self.ground_touch(ball.id)),
        }
    }

    fn player_update(
        &mut self,
        sender: ParticipantId,
        update: PlayerUpdateIn,
    ) -> Result<Vec<Delivery>, RouteError> {
        if !update.position.is_finite() {
            return Err(RouteError::NonFinite("position"));
        }
        if !update.rotation.is_finite() {
            return Err(RouteError::NonFinite("rotation"));
        }

        let transform = Transform {
            position: update.position,
            rotation: update.rotation,
        };
        if !self.participants.update(sender, transform, update.action) {
            return Ok(vec![]);
        }

        Ok(vec![Delivery::peers_of(
            sender,
            ServerMsg::PlayerUpdate(PlayerUpdateMsg {
                id: sender,
                position: update.position,
                rotation: update.rotation,
                action: update.action,
            }),
        )])
    }

    fn throw(
        &mut self,
        sender: ParticipantId,
        thrown: BallThrownIn,
        now: Instant,
    ) -> Result<Vec<Delivery>, RouteError> {
        let initial_position = thrown.initial_position.unwrap_or(thrown.position);
        if !thrown.position.is_finite() || !initial_position.is_finite() {
            return Err(RouteError::NonFinite("position"));
        }
        if !thrown.rotation.is_finite() {
            return Err(RouteError::NonFinite("rotation"));
        }
        if !thrown.velocity.is_finite() {
            return Err(RouteError::NonFinite("velocity"));
        }

        let speed = thrown.velocity.length();
        let max = self.rules.max_throw_speed;
        if speed > max + THROW_SPEED_TOLERANCE {
            return Err(RouteError::ThrowTooFast { speed, max });
        }

        if let Some(cooldown) = self.throw_cooldown {
            let thrower = self
                .participants
                .get_mut(sender)
                .ok_or(RouteError::UnknownSender(sender))?;
            if !thrower.can_throw_at(now) {
                return Err(RouteError::CooldownActive);
            }
            thrower.start_cooldown(now, cooldown);
        }

        let outcome = self.projectiles.throw(
            sender,
            Launch {
                position: thrown.position,
                rotation: thrown.rotation,
                velocity: thrown.velocity,
                initial_position,
                client_ref: thrown.client_ref,
            },
        );

        let mut out = Vec::with_capacity(2);
        if let Some(evicted) = outcome.evicted {
            tracing::debug!(
                "Participant {} threw again, evicting ball {}",
                sender,
                evicted.id
            );
            out.push(ball_removed(evicted.id));
        }
        tracing::debug!(
            "Participant {} threw ball {} at {:.1} m/s",
            sender,
            outcome.projectile.id,
            speed
        );
        out.push(Delivery::all(ServerMsg::BallThrown(
            outcome.projectile.to_wire(),
        )));
        Ok(out)
    }

    /// `catcher` reports picking up a ball. A clean catch scores, including
    /// catching your own throw; a grounded ball is just cleared.
    fn catch_ball(&mut self, catcher: ParticipantId, id: ProjectileId) -> Vec<Delivery> {
        let Some(projectile) = self.projectiles.remove(id) else {
            return vec![];
        };
        let mut out = vec![ball_removed(id)];

        if projectile.hit_ground {
            tracing::debug!("Participant {} retrieved grounded ball {}", catcher, id);
            return out;
        }

        let Some(catcher_record) = self.participants.get_mut(catcher) else {
            return out;
        };
        catcher_record.catch_count += 1;
        catcher_record.reset_cooldown();
        let catch_count = catcher_record.catch_count;

        if let Some(thrower) = self.participants.get_mut(projectile.owner_id) {
            thrower.catch_count = catch_count;
        }

        tracing::debug!(
            "Participant {} caught ball {} from {} (streak {})",
            catcher,
            id,
            projectile.owner_id,
            catch_count
        );
        out.push(Delivery::all(ServerMsg::CatchUpdate(CatchUpdateMsg {
            catcher_id: Some(catcher),
            thrower_id: projectile.owner_id,
            catch_count,
        })));
        out
    }

    /// Any client may report ground contact; only the first report counts.
    fn ground_touch(&mut self, id: ProjectileId) -> Vec<Delivery> {
        let Some(hit) = self.projectiles.mark_ground_hit(id) else {
            return vec![];
        };
        if !hit.first {
            return vec![];
        }

        if let Some(thrower) = self.participants.get_mut(hit.owner_id) {
            thrower.catch_count = 0;
        }
        tracing::debug!("Ball {} hit the ground, resetting {}", id, hit.owner_id);

        vec![Delivery::all(ServerMsg::CatchUpdate(CatchUpdateMsg {
            catcher_id: None,
            thrower_id: hit.owner_id,
            catch_count: 0,
        }))]
    }
}

fn ball_removed(id: ProjectileId) -> Delivery {
    Delivery::all(ServerMsg::BallRemoved(BallRemovedMsg { id }))
}
