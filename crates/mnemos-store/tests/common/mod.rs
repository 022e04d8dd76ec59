//! Storage contract checks shared by the embedded and Postgres suites.
//!
//! Each check seeds its own uniquely named agent so the suites can run
//! against a database that already holds data from earlier runs.

#![allow(dead_code)]

use mnemos_store::StorageAdapter;
use mnemos_types::agent::{Agent, AgentUpdate, DeleteOutcome};
use mnemos_types::entity::{Component, Entity, Relationship};
use mnemos_types::error::StoreError;
use mnemos_types::memory::{Memory, MemoryContent, MemoryQuery, MemorySearch};
use mnemos_types::task::{LogEntry, LogQuery, Task};
use mnemos_types::world::{ChannelType, Room, World};
use serde_json::json;
use uuid::Uuid;

pub const MESSAGES: &str = "messages";

/// An agent with one world, one room and one participating entity.
pub struct Seeded {
    pub agent: Agent,
    pub world: World,
    pub room: Room,
    pub entity: Entity,
}

pub fn unique_name(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

pub async fn seed(adapter: &StorageAdapter, prefix: &str) -> Seeded {
    let agent = Agent::new(unique_name(prefix));
    assert!(adapter.agents().create_agent(&agent).await.unwrap());

    let world = World::new(agent.id, "home");
    assert!(adapter.worlds().create_world(&world).await.unwrap());
    let room = Room::new(agent.id, world.id, "discord", ChannelType::Group);
    assert!(adapter.worlds().create_rooms(&[room.clone()]).await.unwrap());

    let entity = Entity::new(agent.id, vec![unique_name("user")]);
    assert!(adapter
        .entities()
        .create_entities(&[entity.clone()])
        .await
        .unwrap());
    assert!(adapter
        .worlds()
        .add_participants(&[entity.id], room.id)
        .await
        .unwrap());

    Seeded {
        agent,
        world,
        room,
        entity,
    }
}

pub async fn entity_round_trip(adapter: &StorageAdapter) {
    let s = seed(adapter, "round-trip").await;
    let mut entity = Entity::new(s.agent.id, vec!["Ada".into(), "ada_l".into()]);
    entity.metadata = json!({"discord": {"id": "42"}});
    assert!(adapter
        .entities()
        .create_entities(&[entity.clone()])
        .await
        .unwrap());

    let loaded = adapter
        .entities()
        .get_entity_by_id(entity.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.id, entity.id);
    assert_eq!(loaded.agent_id, s.agent.id);
    assert_eq!(loaded.names, entity.names);
    assert_eq!(loaded.metadata, entity.metadata);
}

pub async fn idempotent_delete(adapter: &StorageAdapter) {
    let s = seed(adapter, "idempotent").await;
    let entities = adapter.entities();
    entities.delete_entity(s.entity.id).await.unwrap();
    entities.delete_entity(s.entity.id).await.unwrap();
    assert!(entities.get_entity_by_id(s.entity.id).await.unwrap().is_none());

    adapter.worlds().delete_room(s.room.id).await.unwrap();
    adapter.worlds().delete_room(s.room.id).await.unwrap();
    adapter.memories().delete_memory(Uuid::new_v4()).await.unwrap();
}

pub async fn agent_name_uniqueness(adapter: &StorageAdapter) {
    let name = unique_name("unique");
    let mut first = Agent::new(name.clone());
    first.bio = vec!["first".into()];
    assert!(adapter.agents().create_agent(&first).await.unwrap());

    let second = Agent::new(name.clone());
    assert!(!adapter.agents().create_agent(&second).await.unwrap());

    let stored = adapter.agents().get_agent(first.id).await.unwrap().unwrap();
    assert_eq!(stored.bio, vec!["first".to_string()]);
    assert!(adapter.agents().get_agent(second.id).await.unwrap().is_none());

    adapter.agents().delete_agent(first.id).await.unwrap();
}

pub async fn settings_merge(adapter: &StorageAdapter) {
    let mut agent = Agent::new(unique_name("settings"));
    agent.settings = json!({"a": 1, "secrets": {"x": 1, "y": 2}});
    assert!(adapter.agents().create_agent(&agent).await.unwrap());

    let update = AgentUpdate::settings(json!({"secrets": {"x": null}, "b": 2}));
    assert!(adapter.agents().update_agent(agent.id, &update).await.unwrap());

    let stored = adapter.agents().get_agent(agent.id).await.unwrap().unwrap();
    assert_eq!(stored.settings, json!({"a": 1, "b": 2, "secrets": {"y": 2}}));

    adapter.agents().delete_agent(agent.id).await.unwrap();
}

pub async fn case_insensitive_search(adapter: &StorageAdapter) {
    let s = seed(adapter, "search").await;
    let shouting = Entity::new(s.agent.id, vec!["UPPERCASE NAME".into()]);
    assert!(adapter
        .entities()
        .create_entities(&[shouting.clone()])
        .await
        .unwrap());

    let found = adapter
        .entities()
        .search_entities_by_name("uppercase", s.agent.id, 10)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, shouting.id);
}

pub async fn embedding_dimension_contract(adapter: &StorageAdapter) {
    let s = seed(adapter, "embedding").await;
    let memories = adapter.memories();

    let early = Memory::new(s.agent.id, s.entity.id, s.room.id, MemoryContent::text("early"))
        .with_embedding(vec![0.5; 384]);
    if memories.embedding_dimension().is_none() {
        let err = memories.create_memory(&early, MESSAGES).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    adapter.ensure_embedding_dimension(768).await.unwrap();
    assert_eq!(memories.embedding_dimension(), Some(768));

    let mut vector = vec![0.0f32; 768];
    vector[0] = 1.0;
    vector[767] = 0.25;
    let memory = Memory::new(s.agent.id, s.entity.id, s.room.id, MemoryContent::text("hello"))
        .with_embedding(vector.clone());
    let id = memories.create_memory(&memory, MESSAGES).await.unwrap().unwrap();

    let loaded = memories.get_memory_by_id(id).await.unwrap().unwrap();
    assert_eq!(loaded.content.text, "hello");
    assert_eq!(loaded.partition, MESSAGES);
    let stored = loaded.embedding.unwrap();
    assert_eq!(stored.len(), 768);
    assert!((stored[0] - 1.0).abs() < 1e-6);
    assert!((stored[767] - 0.25).abs() < 1e-6);

    let wrong = Memory::new(s.agent.id, s.entity.id, s.room.id, MemoryContent::text("short"))
        .with_embedding(vec![0.5; 384]);
    let err = memories.create_memory(&wrong, MESSAGES).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let hits = memories
        .search_memories(&MemorySearch {
            partition: MESSAGES.into(),
            embedding: vector,
            match_threshold: 0.9,
            count: 5,
            room_id: Some(s.room.id),
            world_id: None,
            entity_id: None,
            agent_id: None,
            unique_only: false,
        })
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].memory.id, id);
    assert!(hits[0].similarity > 0.99);
}

/// Populate every store for one agent, delete the agent and check nothing
/// it owned survives while a second agent is untouched.
pub async fn cascade_completeness(adapter: &StorageAdapter) {
    let doomed = seed(adapter, "doomed").await;
    let bystander = seed(adapter, "bystander").await;

    let other = Entity::new(doomed.agent.id, vec![unique_name("friend")]);
    assert!(adapter
        .entities()
        .create_entities(&[other.clone()])
        .await
        .unwrap());
    assert!(adapter
        .relationships()
        .create_relationship(&Relationship::new(doomed.agent.id, doomed.entity.id, other.id))
        .await
        .unwrap());
    assert!(adapter
        .components()
        .create_component(&Component::new(
            doomed.agent.id,
            doomed.entity.id,
            "profile",
            json!({"tz": "UTC"}),
        ))
        .await
        .unwrap());
    // A bystander component about an entity of the doomed agent.
    assert!(adapter
        .components()
        .create_component(&Component::new(
            bystander.agent.id,
            doomed.entity.id,
            "mention",
            json!({}),
        ))
        .await
        .unwrap());

    let memory = Memory::new(
        doomed.agent.id,
        doomed.entity.id,
        doomed.room.id,
        MemoryContent::text("gone soon"),
    );
    assert!(adapter
        .memories()
        .create_memory(&memory, MESSAGES)
        .await
        .unwrap()
        .is_some());
    let kept = Memory::new(
        bystander.agent.id,
        bystander.entity.id,
        bystander.room.id,
        MemoryContent::text("still here"),
    );
    assert!(adapter
        .memories()
        .create_memory(&kept, MESSAGES)
        .await
        .unwrap()
        .is_some());

    let mut task = Task::new(doomed.agent.id, "remind");
    task.room_id = Some(doomed.room.id);
    assert!(adapter.tasks().create_task(&task).await.unwrap().is_some());
    adapter
        .cache()
        .set_cache(doomed.agent.id, "last_seen", &json!(1))
        .await
        .unwrap();
    assert!(adapter
        .logs()
        .log(&LogEntry::new(
            doomed.entity.id,
            Some(doomed.room.id),
            "action",
            json!({"ok": true}),
        ))
        .await
        .unwrap());

    let outcome = adapter.agents().delete_agent(doomed.agent.id).await.unwrap();
    let DeleteOutcome::Deleted(report) = outcome else {
        panic!("agent should have been deleted");
    };
    assert_eq!(report.rows_for("agents"), 1);
    assert_eq!(report.rows_for("memories"), 1);
    assert_eq!(report.rows_for("components"), 2);

    assert!(adapter.agents().get_agent(doomed.agent.id).await.unwrap().is_none());
    assert!(adapter.worlds().get_world(doomed.world.id).await.unwrap().is_none());
    assert!(adapter.worlds().get_room(doomed.room.id).await.unwrap().is_none());
    assert!(adapter
        .entities()
        .get_entity_by_id(other.id)
        .await
        .unwrap()
        .is_none());
    assert!(adapter
        .memories()
        .get_memory_by_id(memory.id)
        .await
        .unwrap()
        .is_none());
    assert!(adapter.tasks().get_task(task.id).await.unwrap().is_none());
    assert!(adapter
        .cache()
        .get_cache(doomed.agent.id, "last_seen")
        .await
        .unwrap()
        .is_none());
    assert!(adapter
        .logs()
        .get_logs(&LogQuery {
            entity_id: Some(doomed.entity.id),
            ..Default::default()
        })
        .await
        .unwrap()
        .is_empty());

    assert!(adapter
        .agents()
        .get_agent(bystander.agent.id)
        .await
        .unwrap()
        .is_some());
    let survivors = adapter
        .memories()
        .get_memories(&MemoryQuery::room(MESSAGES, bystander.room.id))
        .await
        .unwrap();
    assert_eq!(survivors.len(), 1);
    assert_eq!(survivors[0].id, kept.id);

    assert_eq!(
        adapter.agents().delete_agent(doomed.agent.id).await.unwrap(),
        DeleteOutcome::NotFound
    );
}
