//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::game::{CoinId, InputIntent, PlayerId};

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Request to join the world
    Join {
        #[serde(default = "default_player_name")]
        name: String,
    },

    /// Latest directional intent for a player
    Input {
        #[serde(rename = "playerId")]
        player_id: PlayerId,
        /// Client-assigned, strictly increasing per player
        seq: u64,
        input: InputIntent,
    },
}

fn default_player_name() -> String {
    "Player".to_string()
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Reply to a join
    Welcome { id: PlayerId, name: String },

    /// Full world snapshot, sent every tick
    State(Snapshot),
}

impl ServerMsg {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

/// Complete, self-contained copy of the world for one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Server tick number
    pub tick: u64,
    /// Unix time in seconds when the snapshot was built
    pub server_time: f64,
    pub players: BTreeMap<PlayerId, PlayerSnapshot>,
    pub coins: Vec<CoinSnapshot>,
}

/// Player state in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub score: u64,
    /// Last accepted input sequence
    pub last_processed_input_seq: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinSnapshot {
    pub id: CoinId,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed client message: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Failed to encode server message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Decode one inbound text frame. Anything that is not exactly one of the
/// known client messages is rejected.
pub fn decode_client_msg(text: &str) -> Result<ClientMsg, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn decodes_join() {
        let msg = decode_client_msg(r#"{"type":"join","name":"alice"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMsg::Join {
                name: "alice".to_string()
            }
        );
    }

    #[test]
    fn join_name_defaults() {
        let msg = decode_client_msg(r#"{"type":"join"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMsg::Join {
                name: "Player".to_string()
            }
        );
    }

    #[test]
    fn decodes_input_with_partial_flags() {
        let id = Uuid::from_u128(7);
        let text = json!({
            "type": "input",
            "playerId": id.to_string(),
            "seq": 3,
            "input": {"right": true}
        })
        .to_string();

        let msg = decode_client_msg(&text).unwrap();
        assert_eq!(
            msg,
            ClientMsg::Input {
                player_id: PlayerId(id),
                seq: 3,
                input: InputIntent {
                    right: true,
                    ..InputIntent::IDLE
                },
            }
        );
    }

    #[test]
    fn rejects_malformed_frames() {
        let bad = [
            "not json",
            r#"{"name":"no type"}"#,
            r#"{"type":"teleport","x":1}"#,
            r#"{"type":"input","seq":1,"input":{}}"#,
            r#"{"type":"input","playerId":"not-a-uuid","seq":1,"input":{}}"#,
            r#"{"type":"input","playerId":"00000000-0000-0000-0000-000000000001","seq":-4,"input":{}}"#,
            r#"{"type":"input","playerId":"00000000-0000-0000-0000-000000000001","seq":1,"input":{"up":"yes"}}"#,
            r#"{"type":"join","name":42}"#,
        ];
        for text in bad {
            assert!(
                matches!(decode_client_msg(text), Err(ProtocolError::Malformed(_))),
                "accepted {text}"
            );
        }
    }

    #[test]
    fn welcome_wire_shape() {
        let id = PlayerId(Uuid::from_u128(1));
        let text = ServerMsg::Welcome {
            id,
            name: "alice".to_string(),
        }
        .to_json()
        .unwrap();

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"type": "welcome", "id": id.to_string(), "name": "alice"})
        );
    }

    #[test]
    fn state_wire_shape() {
        let pid = PlayerId(Uuid::from_u128(1));
        let cid = CoinId(Uuid::from_u128(2));
        let mut players = BTreeMap::new();
        players.insert(
            pid,
            PlayerSnapshot {
                id: pid,
                name: "alice".to_string(),
                x: 1.5,
                y: 2.0,
                vx: 5.0,
                vy: 0.0,
                score: 3,
                last_processed_input_seq: 9,
            },
        );
        let snapshot = Snapshot {
            tick: 12,
            server_time: 1000.25,
            players,
            coins: vec![CoinSnapshot {
                id: cid,
                x: 4.0,
                y: 4.5,
            }],
        };

        let text = ServerMsg::State(snapshot).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["type"], "state");
        assert_eq!(value["tick"], 12);
        assert_eq!(value["serverTime"], 1000.25);
        let player = &value["players"][pid.to_string()];
        assert_eq!(player["id"], pid.to_string());
        assert_eq!(player["lastProcessedInputSeq"], 9);
        assert_eq!(player["score"], 3);
        assert_eq!(player["vx"], 5.0);
        assert_eq!(value["coins"][0]["id"], cid.to_string());
    }
}
