use crate::protocol::{BallWire, ParticipantId, ProjectileId, Rotation, Vec3};
use std::collections::{BTreeMap, HashMap};

/// Launch parameters reported by the thrower.
#[derive(Debug, Clone, PartialEq)]
pub struct Launch {
    pub position: Vec3,
    pub rotation: Rotation,
    pub velocity: Vec3,
    pub initial_position: Vec3,
    pub client_ref: Option<String>,
}

/// A thrown ball. Clients simulate it; the relay only tracks identity,
/// ownership and status.
#[derive(Debug, Clone, PartialEq)]
pub struct Projectile {
    pub id: ProjectileId,
    pub owner_id: ParticipantId,
    pub launch: Launch,
    pub hit_ground: bool,
    pub processed: bool,
}

impl Projectile {
    pub fn to_wire(&self) -> BallWire {
        BallWire {
            id: self.id,
            thrower: self.owner_id,
            position: self.launch.position,
            rotation: self.launch.rotation,
            velocity: self.launch.velocity,
            initial_position: self.launch.initial_position,
            hit_ground: self.hit_ground,
            client_ref: self.launch.client_ref.clone(),
        }
    }
}

/// Result of a throw: the owner's previous projectile (already removed) and
/// the newly admitted one.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrowOutcome {
    pub evicted: Option<Projectile>,
    pub projectile: Projectile,
}

/// Result of a ground-touch report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroundHit {
    pub owner_id: ParticipantId,
    /// True only for the report that flipped `hit_ground`.
    pub first: bool,
}

/// In-flight projectiles, at most one per owner.
#[derive(Debug)]
pub struct ProjectileRegistry {
    projectiles: BTreeMap<ProjectileId, Projectile>,
    by_owner: HashMap<ParticipantId, ProjectileId>,
    next_id: ProjectileId,
}

impl Default for ProjectileRegistry {
    fn default() -> Self {
        Self {
            projectiles: BTreeMap::new(),
            by_owner: HashMap::new(),
            next_id: 1,
        }
    }
}

impl ProjectileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new projectile for `owner_id`, evicting its previous one first.
    pub fn throw(&mut self, owner_id: ParticipantId, launch: Launch) -> ThrowOutcome {
        let evicted = self
            .by_owner
            .get(&owner_id)
            .copied()
            .and_then(|old| self.remove(old));

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);

        let projectile = Projectile {
            id,
            owner_id,
            launch,
            hit_ground: false,
            processed: false,
        };
        self.projectiles.insert(id, projectile.clone());
        self.by_owner.insert(owner_id, id);

        ThrowOutcome {
            evicted,
            projectile,
        }
    }

    /// Remove a projectile. Returns the record with `processed` set, or None
    /// if it is unknown or was already removed.
    pub fn remove(&mut self, id: ProjectileId) -> Option<Projectile> {
        let projectile = self.projectiles.get_mut(&id)?;
        if projectile.processed {
            return None;
        }
        projectile.processed = true;

        let projectile = self.projectiles.remove(&id)?;
        if self.by_owner.get(&projectile.owner_id) == Some(&id) {
            self.by_owner.remove(&projectile.owner_id);
        }
        Some(projectile)
    }

    /// Flag ground contact. The projectile stays in the registry and can
    /// still be picked up.
    pub fn mark_ground_hit(&mut self, id: ProjectileId) -> Option<GroundHit> {
        let projectile = self.projectiles.get_mut(&id)?;
        let first = !projectile.hit_ground;
        projectile.hit_ground = true;
        Some(GroundHit {
            owner_id: projectile.owner_id,
            first,
        })
    }

    /// Cascade removal for a departing owner.
    pub fn remove_all_owned_by(&mut self, owner_id: ParticipantId) -> Vec<Projectile> {
        let owned: Vec<ProjectileId> = self
            .projectiles
            .values()
            .filter(|p| p.owner_id == owner_id)
            .map(|p| p.id)
            .collect();
        owned.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn get(&self, id: ProjectileId) -> Option<&Projectile> {
        self.projectiles.get(&id)
    }

    pub fn owned_by(&self, owner_id: ParticipantId) -> Option<&Projectile> {
        self.by_owner
            .get(&owner_id)
            .and_then(|id| self.projectiles.get(id))
    }

    /// Active projectiles in id order.
    pub fn snapshot(&self) -> Vec<&Projectile> {
        self.projectiles.values().collect()
    }

    pub fn len(&self) -> usize {
        self.projectiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projectiles.is_empty()
    }
}
