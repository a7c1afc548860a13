//! Payload types exchanged with the game server's HTTP API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
    /// Game-system specific attributes, passed through untyped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub system: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Where a dice result came from. The server omits the field, so remote
/// results deserialize as [`RollOrigin::Server`]; the local fallback parser
/// tags its results explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollOrigin {
    #[default]
    Server,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiceRoll {
    pub formula: String,
    pub total: i64,
    /// Individual die results, in roll order.
    #[serde(default = "Vec::new")]
    pub rolls: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub origin: RollOrigin,
}

/// A remote-sourced value, or an explicitly tagged placeholder returned when
/// the keyed transport is unavailable. Callers degrade gracefully without
/// mistaking a placeholder for genuine data.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Live(T),
    Placeholder { reason: String, value: T },
}

impl<T> Fetched<T> {
    pub fn value(&self) -> &T {
        match self {
            Fetched::Live(value) => value,
            Fetched::Placeholder { value, .. } => value,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Fetched::Placeholder { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn actor_deserializes_with_type_rename() {
        let actor: Actor = serde_json::from_value(json!({
            "id": "abc123",
            "name": "Goblin Chief",
            "type": "npc",
            "system": {"hp": 21}
        }))
        .unwrap();
        assert_eq!(actor.kind, "npc");
        assert!(actor.system.is_some());
    }

    #[test]
    fn dice_roll_from_server_defaults_to_server_origin() {
        let roll: DiceRoll = serde_json::from_value(json!({
            "formula": "2d6+3",
            "total": 11,
            "rolls": [4, 4]
        }))
        .unwrap();
        assert_eq!(roll.origin, RollOrigin::Server);
    }

    #[test]
    fn placeholder_is_distinguishable() {
        let fetched = Fetched::Placeholder {
            reason: "keyed transport unavailable".to_string(),
            value: WorldInfo::default(),
        };
        assert!(fetched.is_placeholder());
        assert_eq!(fetched.value().title, "");
        assert!(!Fetched::Live(WorldInfo::default()).is_placeholder());
    }
}
