use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::config::GameRules;
use crate::vec3::{Rotation, Vec3};

/// Protocol version - increment when making breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Relay-assigned participant id.
pub type ParticipantId = u32;

/// Relay-assigned projectile id.
pub type ProjectileId = u32;

/// Longest display name accepted at connect time, in characters.
pub const MAX_NAME_CHARS: usize = 24;

/// Advisory animation state, forwarded to peers for presentation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/shared/generated/")]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[default]
    Idle,
    Run,
    Throw,
    Catch,
    Pickup,
}

// === Server -> Client ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/shared/generated/")]
#[serde(tag = "type")]
pub enum ServerMsg {
    #[serde(rename = "init")]
    Init(InitMsg),
    #[serde(rename = "newUser")]
    NewUser(NewUserMsg),
    #[serde(rename = "playerUpdate")]
    PlayerUpdate(PlayerUpdateMsg),
    #[serde(rename = "ballThrown")]
    BallThrown(BallWire),
    #[serde(rename = "ballRemoved")]
    BallRemoved(BallRemovedMsg),
    #[serde(rename = "catchUpdate")]
    CatchUpdate(CatchUpdateMsg),
    #[serde(rename = "playerDisconnected")]
    PlayerDisconnected(PlayerDisconnectedMsg),
}

/// World snapshot sent once to a newly joined connection.
/// `users` never contains the joiner itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/shared/generated/")]
#[serde(rename_all = "camelCase")]
pub struct InitMsg {
    pub protocol_version: u32,
    pub user_id: ParticipantId,
    pub users: Vec<UserWire>,
    pub balls: Vec<BallWire>,
    pub rules: GameRules,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/shared/generated/")]
pub struct NewUserMsg {
    pub user: UserWire,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/shared/generated/")]
#[serde(rename_all = "camelCase")]
pub struct UserWire {
    pub id: ParticipantId,
    /// Display name picked by the player when connecting, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub position: Vec3,
    pub rotation: Rotation,
    pub action: Action,
    pub can_throw: bool,
    pub catch_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/shared/generated/")]
pub struct PlayerUpdateMsg {
    pub id: ParticipantId,
    pub position: Vec3,
    pub rotation: Rotation,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/shared/generated/")]
#[serde(rename_all = "camelCase")]
pub struct BallWire {
    pub id: ProjectileId,
    pub thrower: ParticipantId,
    pub position: Vec3,
    pub rotation: Rotation,
    pub velocity: Vec3,
    pub initial_position: Vec3,
    #[serde(default)]
    pub hit_ground: bool,
    /// Opaque tag chosen by the thrower, echoed so it can match its local ball.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/shared/generated/")]
pub struct BallRemovedMsg {
    pub id: ProjectileId,
}

/// Score change. `catcher_id` is null when the thrower's streak was reset
/// because the ball touched the ground.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/shared/generated/")]
#[serde(rename_all = "camelCase")]
pub struct CatchUpdateMsg {
    pub catcher_id: Option<ParticipantId>,
    pub thrower_id: ParticipantId,
    pub catch_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/shared/generated/")]
pub struct PlayerDisconnectedMsg {
    pub id: ParticipantId,
}

// === Client -> Server ===
//
// None of these carry the sender's id. Older clients that still send an `id`
// or `thrower` field are accepted; the field is ignored.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/shared/generated/")]
#[serde(tag = "type")]
pub enum ClientMsg {
    #[serde(rename = "playerUpdate")]
    PlayerUpdate(PlayerUpdateIn),
    #[serde(rename = "ballThrown")]
    BallThrown(BallThrownIn),
    #[serde(rename = "ballCaught", alias = "ballRemoved")]
    BallCaught(BallRef),
    #[serde(rename = "groundTouch")]
    GroundTouch(BallRef),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/shared/generated/")]
pub struct PlayerUpdateIn {
    pub position: Vec3,
    pub rotation: Rotation,
    #[serde(default)]
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/shared/generated/")]
#[serde(rename_all = "camelCase")]
pub struct BallThrownIn {
    pub position: Vec3,
    pub rotation: Rotation,
    pub velocity: Vec3,
    /// Where the thrower stood; defaults to `position`.
    #[serde(default)]
    pub initial_position: Option<Vec3>,
    #[serde(default)]
    pub client_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/shared/generated/")]
pub struct BallRef {
    pub id: ProjectileId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec3::vec3;

    #[test]
    fn server_msg_init_roundtrip() {
        let msg = ServerMsg::Init(InitMsg {
            protocol_version: PROTOCOL_VERSION,
            user_id: 2,
            users: vec![UserWire {
                id: 1,
                name: Some("Robin".to_string()),
                position: vec3(1.0, 0.0, -3.0),
                rotation: Rotation::yaw(0.5),
                action: Action::Run,
                can_throw: true,
                catch_count: 4,
            }],
            balls: vec![],
            rules: GameRules::default(),
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"init\""));
        assert!(json.contains("\"userId\":2"));
        assert!(json.contains("\"catchCount\":4"));
        assert!(json.contains("\"action\":\"run\""));
        assert!(json.contains("\"name\":\"Robin\""));
        let parsed: ServerMsg = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn ground_reset_serializes_null_catcher() {
        let msg = ServerMsg::CatchUpdate(CatchUpdateMsg {
            catcher_id: None,
            thrower_id: 3,
            catch_count: 0,
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"catchUpdate\""));
        assert!(json.contains("\"catcherId\":null"));
        assert!(json.contains("\"throwerId\":3"));
    }

    #[test]
    fn ball_thrown_omits_missing_client_ref() {
        let ball = BallWire {
            id: 9,
            thrower: 1,
            position: vec3(0.0, 2.0, 0.0),
            rotation: Rotation::default(),
            velocity: vec3(0.0, 10.0, -10.0),
            initial_position: vec3(0.0, 1.0, 0.0),
            hit_ground: false,
            client_ref: None,
        };
        let json = serde_json::to_string(&ServerMsg::BallThrown(ball)).unwrap();
        assert!(json.contains("\"type\":\"ballThrown\""));
        assert!(json.contains("\"initialPosition\""));
        assert!(!json.contains("clientRef"));
    }

    #[test]
    fn outbound_rotation_uses_engine_field_names() {
        let ball = ServerMsg::BallThrown(BallWire {
            id: 1,
            thrower: 2,
            position: vec3(0.0, 1.0, 0.0),
            rotation: Rotation::new(0.1, 0.2, 0.3),
            velocity: vec3(0.0, 5.0, -5.0),
            initial_position: vec3(0.0, 1.0, 0.0),
            hit_ground: false,
            client_ref: None,
        });
        let json = serde_json::to_value(&ball).unwrap();
        assert_eq!(json["rotation"]["_x"], 0.1);
        assert_eq!(json["rotation"]["_z"], 0.3);
        assert!(json["rotation"].get("x").is_none());

        let update = ServerMsg::PlayerUpdate(PlayerUpdateMsg {
            id: 2,
            position: vec3(1.0, 0.0, 1.0),
            rotation: Rotation::yaw(1.2),
            action: Action::Idle,
        });
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["rotation"]["_y"], 1.2);
        assert!(json["rotation"].get("y").is_none());
        // Positions keep plain names
        assert_eq!(json["position"]["x"], 1.0);
    }

    #[test]
    fn user_without_name_omits_field() {
        let user = UserWire {
            id: 1,
            name: None,
            position: vec3(0.0, 0.0, 0.0),
            rotation: Rotation::default(),
            action: Action::Idle,
            can_throw: true,
            catch_count: 0,
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("name"));
        let parsed: UserWire = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, user);
    }

    #[test]
    fn client_player_update_ignores_claimed_id() {
        let json = r#"{"type":"playerUpdate","id":99,"position":{"x":1,"y":0,"z":2},"rotation":{"_x":0,"_y":1.2,"_z":0},"action":"run"}"#;
        let parsed: ClientMsg = serde_json::from_str(json).unwrap();
        match parsed {
            ClientMsg::PlayerUpdate(update) => {
                assert_eq!(update.position, vec3(1.0, 0.0, 2.0));
                assert_eq!(update.rotation, Rotation::yaw(1.2));
                assert_eq!(update.action, Action::Run);
            }
            other => panic!("Expected PlayerUpdate, got {:?}", other),
        }
    }

    #[test]
    fn client_player_update_action_defaults_to_idle() {
        let json = r#"{"type":"playerUpdate","position":{"x":0,"y":0,"z":0},"rotation":{"x":0,"y":0,"z":0}}"#;
        match serde_json::from_str::<ClientMsg>(json).unwrap() {
            ClientMsg::PlayerUpdate(update) => assert_eq!(update.action, Action::Idle),
            other => panic!("Expected PlayerUpdate, got {:?}", other),
        }
    }

    #[test]
    fn client_ball_removed_is_alias_for_caught() {
        let parsed: ClientMsg = serde_json::from_str(r#"{"type":"ballRemoved","id":12}"#).unwrap();
        assert_eq!(parsed, ClientMsg::BallCaught(BallRef { id: 12 }));

        let parsed: ClientMsg = serde_json::from_str(r#"{"type":"ballCaught","id":12}"#).unwrap();
        assert_eq!(parsed, ClientMsg::BallCaught(BallRef { id: 12 }));
    }

    #[test]
    fn client_ball_thrown_accepts_legacy_fields() {
        let json = r#"{"type":"ballThrown","id":"abc1712345","thrower":"abc","position":{"x":0,"y":1,"z":0},"rotation":{"_x":0,"_y":0,"_z":0},"velocity":{"x":0,"y":5,"z":-5}}"#;
        match serde_json::from_str::<ClientMsg>(json).unwrap() {
            ClientMsg::BallThrown(thrown) => {
                assert_eq!(thrown.velocity, vec3(0.0, 5.0, -5.0));
                assert!(thrown.initial_position.is_none());
                assert!(thrown.client_ref.is_none());
            }
            other => panic!("Expected BallThrown, got {:?}", other),
        }
    }

    #[test]
    fn malformed_client_messages_rejected() {
        // Missing required field
        assert!(serde_json::from_str::<ClientMsg>(r#"{"type":"groundTouch"}"#).is_err());
        // Unknown type
        assert!(serde_json::from_str::<ClientMsg>(r#"{"type":"teleport","id":1}"#).is_err());
        // Unknown action
        assert!(serde_json::from_str::<ClientMsg>(
            r#"{"type":"playerUpdate","position":{"x":0,"y":0,"z":0},"rotation":{"x":0,"y":0,"z":0},"action":"fly"}"#
        )
        .is_err());
        // Missing position component
        assert!(serde_json::from_str::<ClientMsg>(
            r#"{"type":"playerUpdate","position":{"x":0,"y":0},"rotation":{"x":0,"y":0,"z":0}}"#
        )
        .is_err());
    }
}
