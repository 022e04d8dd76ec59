//! Containment hierarchy: worlds own rooms, rooms hold participants.

use super::RejectConflict;
use crate::connection::{placeholders, ConnectionManager, Row, SqlParam};
use crate::sql_params;
use mnemos_types::error::{StoreError, StoreResult};
use mnemos_types::world::{Participant, ParticipantState, Room, World};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const WORLD_COLUMNS: &str = "id, agent_id, name, server_id, metadata, created_at";
const ROOM_COLUMNS: &str =
    "id, agent_id, world_id, name, source, channel_type, channel_id, metadata, created_at";
const PARTICIPANT_COLUMNS: &str = "id, entity_id, room_id, agent_id, room_state, created_at";

/// Worlds, rooms and participants.
#[derive(Clone)]
pub struct WorldStore {
    db: Arc<dyn ConnectionManager>,
}

impl WorldStore {
    pub fn new(db: Arc<dyn ConnectionManager>) -> Self {
        Self { db }
    }

    // ---------------------------------------------------------------
    // Worlds
    // ---------------------------------------------------------------

    /// Returns `false` when the id is taken or the agent is unknown.
    pub async fn create_world(&self, world: &World) -> StoreResult<bool> {
        let mut session = self.db.acquire().await?;
        let created = session
            .execute(
                &format!("INSERT INTO worlds ({WORLD_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"),
                &sql_params![
                    world.id,
                    world.agent_id,
                    world.name.as_deref(),
                    world.server_id.as_deref(),
                    &world.metadata,
                    world.created_at,
                ],
            )
            .await
            .rejected_on_conflict("create_world")?;
        Ok(created.is_some())
    }

    pub async fn get_world(&self, id: Uuid) -> StoreResult<Option<World>> {
        let mut session = self.db.acquire().await?;
        let row = session
            .fetch_optional(
                &format!("SELECT {WORLD_COLUMNS} FROM worlds WHERE id = $1"),
                &sql_params![id],
            )
            .await?;
        row.as_ref().map(world_from_row).transpose()
    }

    /// Every world of an agent.
    pub async fn get_all_worlds(&self, agent_id: Uuid) -> StoreResult<Vec<World>> {
        let mut session = self.db.acquire().await?;
        let rows = session
            .fetch_all(
                &format!("SELECT {WORLD_COLUMNS} FROM worlds WHERE agent_id = $1 ORDER BY created_at"),
                &sql_params![agent_id],
            )
            .await?;
        rows.iter().map(world_from_row).collect()
    }

    /// Replace name, server id and metadata. An unknown id is a no-op.
    pub async fn update_world(&self, world: &World) -> StoreResult<()> {
        let mut session = self.db.acquire().await?;
        session
            .execute(
                "UPDATE worlds SET name = $2, server_id = $3, metadata = $4 WHERE id = $1",
                &sql_params![
                    world.id,
                    world.name.as_deref(),
                    world.server_id.as_deref(),
                    &world.metadata,
                ],
            )
            .await?;
        Ok(())
    }

    /// Delete a world and its rooms. Idempotent.
    pub async fn delete_world(&self, id: Uuid) -> StoreResult<()> {
        let mut session = self.db.acquire().await?;
        let removed = session
            .execute("DELETE FROM worlds WHERE id = $1", &sql_params![id])
            .await?;
        debug!(world_id = %id, removed, "World deleted");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Rooms
    // ---------------------------------------------------------------

    /// Insert a batch of rooms, all or nothing.
    pub async fn create_rooms(&self, rooms: &[Room]) -> StoreResult<bool> {
        let unique: HashSet<Uuid> = rooms.iter().map(|r| r.id).collect();
        if unique.len() != rooms.len() {
            return Ok(false);
        }
        if rooms.is_empty() {
            return Ok(true);
        }
        let mut tx = self.db.begin().await?;
        for room in rooms {
            let inserted = tx
                .execute(
                    &format!("INSERT INTO rooms ({ROOM_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"),
                    &sql_params![
                        room.id,
                        room.agent_id,
                        room.world_id,
                        room.name.as_deref(),
                        room.source.as_str(),
                        room.channel_type.as_str(),
                        room.channel_id.as_deref(),
                        &room.metadata,
                        room.created_at,
                    ],
                )
                .await
                .rejected_on_conflict("create_rooms")?;
            if inserted.is_none() {
                return Ok(false);
            }
        }
        tx.commit().await?;
        info!(count = rooms.len(), "Rooms created");
        Ok(true)
    }

    pub async fn get_room(&self, id: Uuid) -> StoreResult<Option<Room>> {
        Ok(self.get_rooms_by_ids(&[id]).await?.into_iter().next())
    }

    pub async fn get_rooms_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Room>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let params: Vec<SqlParam> = ids.iter().map(|id| SqlParam::from(*id)).collect();
        let mut session = self.db.acquire().await?;
        let rows = session
            .fetch_all(
                &format!(
                    "SELECT {ROOM_COLUMNS} FROM rooms WHERE id IN ({}) ORDER BY created_at",
                    placeholders(1, ids.len())
                ),
                &params,
            )
            .await?;
        rows.iter().map(room_from_row).collect()
    }

    pub async fn get_rooms_by_world(&self, world_id: Uuid) -> StoreResult<Vec<Room>> {
        let mut session = self.db.acquire().await?;
        let rows = session
            .fetch_all(
                &format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE world_id = $1 ORDER BY created_at"),
                &sql_params![world_id],
            )
            .await?;
        rows.iter().map(room_from_row).collect()
    }

    /// Replace name, source, channel and metadata. An unknown id is a no-op.
    pub async fn update_room(&self, room: &Room) -> StoreResult<()> {
        let mut session = self.db.acquire().await?;
        session
            .execute(
                "UPDATE rooms SET name = $2, source = $3, channel_type = $4, channel_id = $5, \
                 metadata = $6 WHERE id = $1",
                &sql_params![
                    room.id,
                    room.name.as_deref(),
                    room.source.as_str(),
                    room.channel_type.as_str(),
                    room.channel_id.as_deref(),
                    &room.metadata,
                ],
            )
            .await?;
        Ok(())
    }

    /// Delete a room with its participants and memories. Idempotent.
    pub async fn delete_room(&self, id: Uuid) -> StoreResult<()> {
        let mut session = self.db.acquire().await?;
        session
            .execute("DELETE FROM rooms WHERE id = $1", &sql_params![id])
            .await?;
        Ok(())
    }

    pub async fn delete_rooms_by_world_id(&self, world_id: Uuid) -> StoreResult<()> {
        let mut session = self.db.acquire().await?;
        let removed = session
            .execute("DELETE FROM rooms WHERE world_id = $1", &sql_params![world_id])
            .await?;
        debug!(world_id = %world_id, removed, "Rooms deleted");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Participants
    // ---------------------------------------------------------------

    /// Add entities to a room; already-present members are left as they are.
    /// Returns `false` (adding nobody) when the room or an entity is unknown.
    pub async fn add_participants(&self, entity_ids: &[Uuid], room_id: Uuid) -> StoreResult<bool> {
        let mut tx = self.db.begin().await?;
        let room = tx
            .fetch_optional("SELECT agent_id FROM rooms WHERE id = $1", &sql_params![room_id])
            .await?;
        let Some(room) = room else {
            debug!(room_id = %room_id, "add_participants: no such room");
            return Ok(false);
        };
        let agent_id = room.uuid("agent_id")?;
        for entity_id in entity_ids {
            let inserted = tx
                .execute(
                    &format!(
                        "INSERT INTO participants ({PARTICIPANT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6) \
                         ON CONFLICT (entity_id, room_id) DO NOTHING"
                    ),
                    &sql_params![
                        Uuid::new_v4(),
                        *entity_id,
                        room_id,
                        agent_id,
                        None::<String>,
                        chrono::Utc::now(),
                    ],
                )
                .await
                .rejected_on_conflict("add_participants")?;
            if inserted.is_none() {
                return Ok(false);
            }
        }
        tx.commit().await?;
        Ok(true)
    }

    /// Remove an entity from a room. Returns whether it was a member.
    pub async fn remove_participant(&self, entity_id: Uuid, room_id: Uuid) -> StoreResult<bool> {
        let mut session = self.db.acquire().await?;
        let removed = session
            .execute(
                "DELETE FROM participants WHERE entity_id = $1 AND room_id = $2",
                &sql_params![entity_id, room_id],
            )
            .await?;
        Ok(removed > 0)
    }

    /// Entity ids of a room's members.
    pub async fn get_participants_for_room(&self, room_id: Uuid) -> StoreResult<Vec<Uuid>> {
        let mut session = self.db.acquire().await?;
        let rows = session
            .fetch_all(
                "SELECT entity_id FROM participants WHERE room_id = $1 ORDER BY created_at",
                &sql_params![room_id],
            )
            .await?;
        rows.iter().map(|r| r.uuid("entity_id")).collect()
    }

    /// Memberships of an entity.
    pub async fn get_participants_for_entity(&self, entity_id: Uuid) -> StoreResult<Vec<Participant>> {
        let mut session = self.db.acquire().await?;
        let rows = session
            .fetch_all(
                &format!(
                    "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE entity_id = $1 ORDER BY created_at"
                ),
                &sql_params![entity_id],
            )
            .await?;
        rows.iter().map(participant_from_row).collect()
    }

    /// Room ids an entity is a member of.
    pub async fn get_rooms_for_participant(&self, entity_id: Uuid) -> StoreResult<Vec<Uuid>> {
        self.get_rooms_for_participants(&[entity_id]).await
    }

    /// Distinct room ids any of the entities is a member of.
    pub async fn get_rooms_for_participants(&self, entity_ids: &[Uuid]) -> StoreResult<Vec<Uuid>> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }
        let params: Vec<SqlParam> = entity_ids.iter().map(|id| SqlParam::from(*id)).collect();
        let mut session = self.db.acquire().await?;
        let rows = session
            .fetch_all(
                &format!(
                    "SELECT DISTINCT room_id FROM participants WHERE entity_id IN ({})",
                    placeholders(1, entity_ids.len())
                ),
                &params,
            )
            .await?;
        rows.iter().map(|r| r.uuid("room_id")).collect()
    }

    pub async fn is_room_participant(&self, room_id: Uuid, entity_id: Uuid) -> StoreResult<bool> {
        let mut session = self.db.acquire().await?;
        let row = session
            .fetch_optional(
                "SELECT id FROM participants WHERE room_id = $1 AND entity_id = $2",
                &sql_params![room_id, entity_id],
            )
            .await?;
        Ok(row.is_some())
    }

    /// Per-room state of a member; `None` when unset or not a member.
    pub async fn get_participant_user_state(
        &self,
        room_id: Uuid,
        entity_id: Uuid,
    ) -> StoreResult<Option<ParticipantState>> {
        let mut session = self.db.acquire().await?;
        let row = session
            .fetch_optional(
                "SELECT room_state FROM participants WHERE room_id = $1 AND entity_id = $2",
                &sql_params![room_id, entity_id],
            )
            .await?;
        match row {
            Some(row) => parse_state(row.opt_text("room_state")?),
            None => Ok(None),
        }
    }

    /// Set or clear the per-room state of a member. A non-member is a no-op.
    pub async fn set_participant_user_state(
        &self,
        room_id: Uuid,
        entity_id: Uuid,
        state: Option<ParticipantState>,
    ) -> StoreResult<()> {
        let mut session = self.db.acquire().await?;
        session
            .execute(
                "UPDATE participants SET room_state = $3 WHERE room_id = $1 AND entity_id = $2",
                &sql_params![room_id, entity_id, state.map(|s| s.as_str())],
            )
            .await?;
        Ok(())
    }
}

fn parse_state(raw: Option<String>) -> StoreResult<Option<ParticipantState>> {
    raw.map(|s| s.parse().map_err(StoreError::Database))
        .transpose()
}

fn world_from_row(row: &Row) -> StoreResult<World> {
    Ok(World {
        id: row.uuid("id")?,
        agent_id: row.uuid("agent_id")?,
        name: row.opt_text("name")?,
        server_id: row.opt_text("server_id")?,
        metadata: row.json("metadata")?,
        created_at: row.timestamp("created_at")?,
    })
}

fn room_from_row(row: &Row) -> StoreResult<Room> {
    Ok(Room {
        id: row.uuid("id")?,
        agent_id: row.uuid("agent_id")?,
        world_id: row.uuid("world_id")?,
        name: row.opt_text("name")?,
        source: row.text("source")?,
        channel_type: row
            .text("channel_type")?
            .parse()
            .map_err(StoreError::Database)?,
        channel_id: row.opt_text("channel_id")?,
        metadata: row.json("metadata")?,
        created_at: row.timestamp("created_at")?,
    })
}

fn participant_from_row(row: &Row) -> StoreResult<Participant> {
    Ok(Participant {
        id: row.uuid("id")?,
        entity_id: row.uuid("entity_id")?,
        room_id: row.uuid("room_id")?,
        agent_id: row.uuid("agent_id")?,
        user_state: parse_state(row.opt_text("room_state")?)?,
        created_at: row.timestamp("created_at")?,
    })
}
