//! Wire types plus the delivery envelope the relay emits.

pub use catch_shared::config::GameRules;
pub use catch_shared::protocol::*;
pub use catch_shared::vec3::{vec3, Rotation, Vec3};

/// Which connections a message goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    All,
    AllExcept(ParticipantId),
    Only(ParticipantId),
}

impl Target {
    pub fn includes(self, id: ParticipantId) -> bool {
        match self {
            Target::All => true,
            Target::AllExcept(excluded) => excluded != id,
            Target::Only(only) => only == id,
        }
    }
}

/// A server message addressed to a set of connections.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub target: Target,
    pub msg: ServerMsg,
}

impl Delivery {
    pub fn all(msg: ServerMsg) -> Self {
        Self {
            target: Target::All,
            msg,
        }
    }

    pub fn peers_of(id: ParticipantId, msg: ServerMsg) -> Self {
        Self {
            target: Target::AllExcept(id),
            msg,
        }
    }

    pub fn only(id: ParticipantId, msg: ServerMsg) -> Self {
        Self {
            target: Target::Only(id),
            msg,
        }
    }
}
