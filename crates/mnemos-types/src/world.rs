//! Containment hierarchy: worlds, rooms and participants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A named container owned by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
    /// Unique world ID.
    pub id: Uuid,
    /// Owning agent.
    pub agent_id: Uuid,
    /// Display name.
    pub name: Option<String>,
    /// Correlation id in the external system (guild, workspace, ...).
    pub server_id: Option<String>,
    /// Free-form metadata.
    pub metadata: serde_json::Value,
    /// When this world was created.
    pub created_at: DateTime<Utc>,
}

impl World {
    /// Create a world with a random ID.
    pub fn new(agent_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            name: Some(name.into()),
            server_id: None,
            metadata: serde_json::Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }
}

/// Channel classification of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelType {
    /// The agent talking to itself.
    #[serde(rename = "SELF")]
    SelfChannel,
    /// Direct message.
    Dm,
    /// Group chat.
    Group,
    /// Voice direct call.
    VoiceDm,
    /// Voice group call.
    VoiceGroup,
    /// Social feed.
    Feed,
    /// Thread under a message.
    Thread,
    /// Simulation world.
    World,
    /// Forum board.
    Forum,
    /// Programmatic API channel.
    Api,
}

impl ChannelType {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::SelfChannel => "SELF",
            ChannelType::Dm => "DM",
            ChannelType::Group => "GROUP",
            ChannelType::VoiceDm => "VOICE_DM",
            ChannelType::VoiceGroup => "VOICE_GROUP",
            ChannelType::Feed => "FEED",
            ChannelType::Thread => "THREAD",
            ChannelType::World => "WORLD",
            ChannelType::Forum => "FORUM",
            ChannelType::Api => "API",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SELF" => Ok(ChannelType::SelfChannel),
            "DM" => Ok(ChannelType::Dm),
            "GROUP" => Ok(ChannelType::Group),
            "VOICE_DM" => Ok(ChannelType::VoiceDm),
            "VOICE_GROUP" => Ok(ChannelType::VoiceGroup),
            "FEED" => Ok(ChannelType::Feed),
            "THREAD" => Ok(ChannelType::Thread),
            "WORLD" => Ok(ChannelType::World),
            "FORUM" => Ok(ChannelType::Forum),
            "API" => Ok(ChannelType::Api),
            other => Err(format!("unknown channel type '{other}'")),
        }
    }
}

/// A room inside exactly one world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    /// Unique room ID.
    pub id: Uuid,
    /// Owning agent.
    pub agent_id: Uuid,
    /// World the room belongs to.
    pub world_id: Uuid,
    /// Display name.
    pub name: Option<String>,
    /// Source label (platform name).
    pub source: String,
    /// Channel classification.
    pub channel_type: ChannelType,
    /// Channel id in the external system.
    pub channel_id: Option<String>,
    /// Free-form metadata.
    pub metadata: serde_json::Value,
    /// When this room was created.
    pub created_at: DateTime<Utc>,
}

impl Room {
    /// Create a room with a random ID.
    pub fn new(
        agent_id: Uuid,
        world_id: Uuid,
        source: impl Into<String>,
        channel_type: ChannelType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            world_id,
            name: None,
            source: source.into(),
            channel_type,
            channel_id: None,
            metadata: serde_json::Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }
}

/// Per-room state of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantState {
    /// The agent actively follows the room.
    Followed,
    /// The agent ignores the room.
    Muted,
}

impl ParticipantState {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantState::Followed => "FOLLOWED",
            ParticipantState::Muted => "MUTED",
        }
    }
}

impl FromStr for ParticipantState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FOLLOWED" => Ok(ParticipantState::Followed),
            "MUTED" => Ok(ParticipantState::Muted),
            other => Err(format!("unknown participant state '{other}'")),
        }
    }
}

/// Membership of an entity in a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    /// Unique participant row ID.
    pub id: Uuid,
    /// Member entity.
    pub entity_id: Uuid,
    /// Room.
    pub room_id: Uuid,
    /// Agent owning the room.
    pub agent_id: Uuid,
    /// Optional per-room state.
    pub user_state: Option<ParticipantState>,
    /// When the entity joined.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_type_round_trips_through_str() {
        for ct in [
            ChannelType::SelfChannel,
            ChannelType::Dm,
            ChannelType::VoiceGroup,
            ChannelType::Api,
        ] {
            assert_eq!(ct.as_str().parse::<ChannelType>().unwrap(), ct);
        }
        assert!("CHAT".parse::<ChannelType>().is_err());
    }

    #[test]
    fn test_channel_type_serde_matches_str() {
        let value = serde_json::to_value(ChannelType::SelfChannel).unwrap();
        assert_eq!(value, "SELF");
        let value = serde_json::to_value(ChannelType::VoiceDm).unwrap();
        assert_eq!(value, "VOICE_DM");
    }
}
