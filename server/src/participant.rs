use crate::protocol::{Action, ParticipantId, Rotation, UserWire, Vec3, MAX_NAME_CHARS};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Last-reported pose of a participant. Never simulated on the relay.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Rotation,
}

/// Why a requested display name was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("name is longer than {MAX_NAME_CHARS} characters")]
    TooLong,
    #[error("name contains control characters")]
    ControlChars,
}

/// Normalize a display name requested at connect time. Surrounding
/// whitespace is dropped; a blank name means no name.
pub fn display_name(raw: &str) -> Result<Option<String>, NameError> {
    let name = raw.trim();
    if name.is_empty() {
        return Ok(None);
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(NameError::TooLong);
    }
    if name.chars().any(char::is_control) {
        return Err(NameError::ControlChars);
    }
    Ok(Some(name.to_string()))
}

/// A connected player session.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: Option<String>,
    pub transform: Transform,
    pub action: Action,
    /// Cleared by a throw while the relay enforces the cooldown, set again by
    /// a clean catch or once `cooldown_until` passes.
    pub can_throw: bool,
    pub catch_count: u32,
    pub cooldown_until: Option<Instant>,
}

impl Participant {
    pub fn new(id: ParticipantId) -> Self {
        Self {
            id,
            name: None,
            transform: Transform::default(),
            action: Action::Idle,
            can_throw: true,
            catch_count: 0,
            cooldown_until: None,
        }
    }

    /// Whether a throw is allowed at `now`.
    pub fn can_throw_at(&self, now: Instant) -> bool {
        self.can_throw || self.cooldown_until.is_some_and(|until| now >= until)
    }

    /// Consume the throw gate for `cooldown`.
    pub fn start_cooldown(&mut self, now: Instant, cooldown: Duration) {
        self.can_throw = false;
        self.cooldown_until = now.checked_add(cooldown);
    }

    /// Re-arm the throw gate (after a clean catch).
    pub fn reset_cooldown(&mut self) {
        self.can_throw = true;
        self.cooldown_until = None;
    }

    pub fn to_wire(&self, now: Instant) -> UserWire {
        UserWire {
            id: self.id,
            name: self.name.clone(),
            position: self.transform.position,
            rotation: self.transform.rotation,
            action: self.action,
            can_throw: self.can_throw_at(now),
            catch_count: self.catch_count,
        }
    }
}

/// Connected participants keyed by id.
///
/// Ids are handed out in increasing order, so key order is join order.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    participants: BTreeMap<ParticipantId, Participant>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection with default state. Re-registering an id
    /// resets its record.
    pub fn register(&mut self, id: ParticipantId, name: Option<String>) -> &Participant {
        let participant = Participant {
            name,
            ..Participant::new(id)
        };
        self.participants.insert(id, participant);
        &self.participants[&id]
    }

    /// Apply a pose report. Returns false (and changes nothing) for an unknown id.
    pub fn update(&mut self, id: ParticipantId, transform: Transform, action: Action) -> bool {
        match self.participants.get_mut(&id) {
            Some(participant) => {
                participant.transform = transform;
                participant.action = action;
                true
            }
            None => {
                tracing::debug!("Update for unknown participant {}", id);
                false
            }
        }
    }

    pub fn remove(&mut self, id: ParticipantId) -> Option<Participant> {
        self.participants.remove(&id)
    }

    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn get_mut(&mut self, id: ParticipantId) -> Option<&mut Participant> {
        self.participants.get_mut(&id)
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.participants.contains_key(&id)
    }

    /// All participants in join order.
    pub fn snapshot(&self) -> Vec<&Participant> {
        self.participants.values().collect()
    }

    /// All participants except `id`, in join order.
    pub fn snapshot_except(&self, id: ParticipantId) -> Vec<&Participant> {
        self.participants.values().filter(|p| p.id != id).collect()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::vec3;

    fn pose(x: f64, z: f64) -> Transform {
        Transform {
            position: vec3(x, 0.0, z),
            rotation: Rotation::yaw(0.3),
        }
    }

    #[test]
    fn register_uses_defaults() {
        let mut registry = ConnectionRegistry::new();
        let p = registry.register(4, None);
        assert_eq!(p.id, 4);
        assert_eq!(p.transform, Transform::default());
        assert_eq!(p.action, Action::Idle);
        assert!(p.can_throw);
        assert_eq!(p.catch_count, 0);
        assert!(p.name.is_none());
    }

    #[test]
    fn registered_name_reaches_wire() {
        let mut registry = ConnectionRegistry::new();
        let wire = registry
            .register(2, Some("Robin".to_string()))
            .to_wire(Instant::now());
        assert_eq!(wire.name.as_deref(), Some("Robin"));
    }

    #[test]
    fn display_name_rules() {
        assert_eq!(display_name("  Robin "), Ok(Some("Robin".to_string())));
        assert_eq!(display_name("   "), Ok(None));
        assert_eq!(display_name("Zoë 🎾"), Ok(Some("Zoë 🎾".to_string())));
        assert_eq!(display_name(&"é".repeat(MAX_NAME_CHARS)).map(|n| n.is_some()), Ok(true));
        assert_eq!(
            display_name(&"a".repeat(MAX_NAME_CHARS + 1)),
            Err(NameError::TooLong)
        );
        assert_eq!(display_name("bad\nname"), Err(NameError::ControlChars));
    }

    #[test]
    fn update_only_touches_target() {
        let mut registry = ConnectionRegistry::new();
        registry.register(1, None);
        registry.register(2, None);

        assert!(registry.update(1, pose(3.0, 4.0), Action::Run));

        assert_eq!(registry.get(1).unwrap().transform, pose(3.0, 4.0));
        assert_eq!(registry.get(1).unwrap().action, Action::Run);
        assert_eq!(registry.get(2).unwrap().transform, Transform::default());
    }

    #[test]
    fn update_unknown_id_is_noop() {
        let mut registry = ConnectionRegistry::new();
        registry.register(1, None);
        assert!(!registry.update(9, pose(1.0, 1.0), Action::Run));
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(9));
    }

    #[test]
    fn remove_returns_record_once() {
        let mut registry = ConnectionRegistry::new();
        registry.register(1, None);
        assert_eq!(registry.remove(1).map(|p| p.id), Some(1));
        assert!(registry.remove(1).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_join_order_and_except_skips_self() {
        let mut registry = ConnectionRegistry::new();
        for id in [1, 2, 3] {
            registry.register(id, None);
        }
        let ids: Vec<_> = registry.snapshot().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let others: Vec<_> = registry.snapshot_except(2).iter().map(|p| p.id).collect();
        assert_eq!(others, vec![1, 3]);
    }

    #[test]
    fn cooldown_gate() {
        let now = Instant::now();
        let mut p = Participant::new(1);
        assert!(p.can_throw_at(now));

        p.start_cooldown(now, Duration::from_secs(5));
        assert!(!p.can_throw_at(now + Duration::from_secs(4)));
        assert!(p.can_throw_at(now + Duration::from_secs(5)));
        assert!(!p.to_wire(now).can_throw);

        p.reset_cooldown();
        assert!(p.can_throw_at(now));
        assert!(p.to_wire(now).can_throw);
    }
}
