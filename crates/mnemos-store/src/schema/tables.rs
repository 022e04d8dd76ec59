//! The core schema module: every table the built-in stores use.

use super::{
    boolean, created_at, json, text, text_array, timestamp, uuid, vector, DefaultValue,
    SchemaModule, TableDef,
};
use mnemos_types::memory::SUPPORTED_DIMENSIONS;

/// Registration name of the core module.
pub const CORE_MODULE: &str = "mnemos-core";

/// Physical embedding column for a supported width.
pub fn dimension_column(width: usize) -> String {
    format!("dim_{width}")
}

fn metadata() -> super::ColumnDef {
    json("metadata").not_null().default(DefaultValue::EmptyObject)
}

pub fn agents() -> TableDef {
    TableDef::new("agents")
        .column(uuid("id").primary_key())
        .column(text("name").not_null().unique())
        .column(text("username"))
        .column(text("system"))
        .column(json("bio").not_null().default(DefaultValue::EmptyArray))
        .column(json("plugins").not_null().default(DefaultValue::EmptyArray))
        .column(json("settings").not_null().default(DefaultValue::EmptyObject))
        .column(boolean("enabled").not_null().default(DefaultValue::Bool(true)))
        .column(created_at("created_at"))
        .column(created_at("updated_at"))
}

pub fn worlds() -> TableDef {
    TableDef::new("worlds")
        .column(uuid("id").primary_key())
        .column(uuid("agent_id").not_null())
        .column(text("name"))
        .column(text("server_id"))
        .column(metadata())
        .column(created_at("created_at"))
        .references("agent_id", "agents")
        .index("idx_worlds_agent_id", &["agent_id"])
}

pub fn rooms() -> TableDef {
    TableDef::new("rooms")
        .column(uuid("id").primary_key())
        .column(uuid("agent_id").not_null())
        .column(uuid("world_id").not_null())
        .column(text("name"))
        .column(text("source").not_null())
        .column(text("channel_type").not_null())
        .column(text("channel_id"))
        .column(metadata())
        .column(created_at("created_at"))
        .check(
            "rooms_channel_type_check",
            "channel_type IN ('SELF', 'DM', 'GROUP', 'VOICE_DM', 'VOICE_GROUP', \
             'FEED', 'THREAD', 'WORLD', 'FORUM', 'API')",
        )
        .references("agent_id", "agents")
        .references("world_id", "worlds")
        .index("idx_rooms_agent_id", &["agent_id"])
        .index("idx_rooms_world_id", &["world_id"])
}

pub fn entities() -> TableDef {
    TableDef::new("entities")
        .column(uuid("id").primary_key())
        .column(uuid("agent_id").not_null())
        .column(json("names").not_null().default(DefaultValue::EmptyArray))
        .column(metadata())
        .column(created_at("created_at"))
        .column(created_at("updated_at"))
        .references("agent_id", "agents")
        .index("idx_entities_agent_id", &["agent_id"])
}

pub fn components() -> TableDef {
    TableDef::new("components")
        .column(uuid("id").primary_key())
        .column(uuid("entity_id").not_null())
        .column(uuid("agent_id").not_null())
        .column(uuid("room_id"))
        .column(uuid("world_id"))
        .column(uuid("source_entity_id"))
        .column(text("type").not_null())
        .column(json("data").not_null().default(DefaultValue::EmptyObject))
        .column(created_at("created_at"))
        .references("entity_id", "entities")
        .references("agent_id", "agents")
        .references("room_id", "rooms")
        .references("world_id", "worlds")
        .references("source_entity_id", "entities")
        .index("idx_components_entity_id", &["entity_id"])
        .null_safe_unique_index(
            "uq_components_key",
            &["entity_id", "type", "world_id", "source_entity_id"],
        )
}

pub fn relationships() -> TableDef {
    TableDef::new("relationships")
        .column(uuid("id").primary_key())
        .column(uuid("source_entity_id").not_null())
        .column(uuid("target_entity_id").not_null())
        .column(uuid("agent_id").not_null())
        .column(text_array("tags").not_null().default(DefaultValue::EmptyArray))
        .column(metadata())
        .column(created_at("created_at"))
        .unique(&["source_entity_id", "target_entity_id"])
        .check(
            "relationships_no_self_loop",
            "source_entity_id <> target_entity_id",
        )
        .references("source_entity_id", "entities")
        .references("target_entity_id", "entities")
        .references("agent_id", "agents")
        .index("idx_relationships_target", &["target_entity_id"])
}

pub fn memories() -> TableDef {
    TableDef::new("memories")
        .column(uuid("id").primary_key())
        .column(text("type").not_null())
        .column(json("content").not_null())
        .column(uuid("entity_id").not_null())
        .column(uuid("agent_id").not_null())
        .column(uuid("room_id").not_null())
        .column(uuid("world_id"))
        .column(boolean("unique").not_null().default(DefaultValue::Bool(true)))
        .column(metadata())
        .column(created_at("created_at"))
        .check("memories_type_not_empty", "type <> ''")
        .references("entity_id", "entities")
        .references("agent_id", "agents")
        .references("room_id", "rooms")
        .references("world_id", "worlds")
        .index("idx_memories_type_room", &["type", "room_id"])
        .index("idx_memories_agent_id", &["agent_id"])
        .index("idx_memories_world_id", &["world_id"])
        .index("idx_memories_created_at", &["created_at"])
}

pub fn embeddings() -> TableDef {
    let mut table = TableDef::new("embeddings")
        .column(uuid("id").primary_key())
        .column(uuid("memory_id").not_null().unique())
        .column(created_at("created_at"));
    for width in SUPPORTED_DIMENSIONS {
        table = table.column(vector(&dimension_column(width), width));
    }
    table.references("memory_id", "memories")
}

pub fn participants() -> TableDef {
    TableDef::new("participants")
        .column(uuid("id").primary_key())
        .column(uuid("entity_id").not_null())
        .column(uuid("room_id").not_null())
        .column(uuid("agent_id").not_null())
        .column(text("room_state"))
        .column(created_at("created_at"))
        .unique(&["entity_id", "room_id"])
        .check(
            "participants_room_state_check",
            "room_state IS NULL OR room_state IN ('FOLLOWED', 'MUTED')",
        )
        .references("entity_id", "entities")
        .references("room_id", "rooms")
        .references("agent_id", "agents")
        .index("idx_participants_room_id", &["room_id"])
}

pub fn tasks() -> TableDef {
    TableDef::new("tasks")
        .column(uuid("id").primary_key())
        .column(text("name").not_null())
        .column(text("description"))
        .column(uuid("agent_id").not_null())
        .column(uuid("room_id"))
        .column(uuid("world_id"))
        .column(uuid("entity_id"))
        .column(text_array("tags").not_null().default(DefaultValue::EmptyArray))
        .column(metadata())
        .column(created_at("created_at"))
        .column(created_at("updated_at"))
        .references("agent_id", "agents")
        .references("room_id", "rooms")
        .references("world_id", "worlds")
        .references("entity_id", "entities")
        .index("idx_tasks_agent_id", &["agent_id"])
        .index("idx_tasks_room_id", &["room_id"])
        .index("idx_tasks_name", &["name"])
}

pub fn logs() -> TableDef {
    TableDef::new("logs")
        .column(uuid("id").primary_key())
        .column(uuid("entity_id").not_null())
        .column(uuid("room_id"))
        .column(text("type").not_null())
        .column(json("body").not_null())
        .column(created_at("created_at"))
        .references("entity_id", "entities")
        .references("room_id", "rooms")
        .index("idx_logs_room_type", &["room_id", "type"])
        .index("idx_logs_entity_id", &["entity_id"])
}

pub fn cache() -> TableDef {
    TableDef::new("cache")
        .column(text("key").not_null())
        .column(uuid("agent_id").not_null())
        .column(json("value").not_null())
        .column(created_at("created_at"))
        .column(timestamp("expires_at"))
        .primary_key(&["key", "agent_id"])
        .references("agent_id", "agents")
}

/// Every core table.
pub fn core_tables() -> Vec<TableDef> {
    vec![
        agents(),
        worlds(),
        rooms(),
        entities(),
        components(),
        relationships(),
        memories(),
        embeddings(),
        participants(),
        tasks(),
        logs(),
        cache(),
    ]
}

pub fn core_module() -> SchemaModule {
    SchemaModule::new(CORE_MODULE, core_tables())
}
