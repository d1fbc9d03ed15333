//! The config topic end to end: router, service worker, SQLite store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use warda_bus::{
    AttachContext, BusError, Envelope, LoopbackChannel, Router, RouterStats, ServiceRegistry,
    SystemPromptAgent,
};
use warda_config::{
    AgentConfigPayload, AgentConfigRecord, AgentKey, ConfigService, SqliteAgentStore,
};
use warda_db::{open_database, DbRuntimeSettings};
use warda_types::{DataPacket, Participant, AGENT_CONFIG_TOPIC, CHAT_TOPIC};

struct Bus {
    _dir: tempfile::TempDir,
    store: SqliteAgentStore,
    service: Arc<ConfigService>,
    router: Arc<Router>,
    outbound: broadcast::Receiver<DataPacket>,
}

async fn bus() -> Bus {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("warda.db");
    let pool = open_database(path.to_str().expect("utf-8"), DbRuntimeSettings::default())
        .expect("database");

    let store = SqliteAgentStore::new(pool);
    let mut record = AgentConfigRecord::new("abc", "Warda").with_system_message("Be kind.");
    record.llm_model_config = json!({"temperature": 0.7, "max_tokens": 200}).to_string();
    store.insert_if_absent(record).await.expect("provision");

    let service = Arc::new(ConfigService::new(Arc::new(store.clone()), "abc").expect("service"));
    let registry = ServiceRegistry::new()
        .with(service.clone())
        .expect("single config service");

    let channel = Arc::new(LoopbackChannel::new(Participant::new("warda_agent", "Warda")));
    let outbound = channel.subscribe();
    let ctx = AttachContext::new(
        channel,
        Arc::new(SystemPromptAgent::default()),
        tokio::runtime::Handle::current(),
    );

    Bus {
        _dir: dir,
        store,
        service,
        router: Arc::new(Router::new(registry, ctx)),
        outbound,
    }
}

fn config_packet(message: serde_json::Value) -> DataPacket {
    let body = json!({"message": message.to_string()}).to_string();
    DataPacket::new(AGENT_CONFIG_TOPIC, body.into_bytes())
        .from_participant(Participant::new("user-1", "Playground"))
}

async fn next_config(outbound: &mut broadcast::Receiver<DataPacket>) -> AgentConfigPayload {
    let packet = tokio::time::timeout(Duration::from_secs(2), outbound.recv())
        .await
        .expect("a response within the timeout")
        .expect("channel open");
    Envelope::<AgentConfigPayload>::parse(&packet.data)
        .expect("valid envelope")
        .into_payload()
        .expect("config payload")
}

#[tokio::test]
async fn partial_update_leaves_other_fields_alone() {
    let mut bus = bus().await;
    bus.router
        .dispatch(config_packet(json!({"agentId": "abc", "outputLimit": 500})))
        .expect("delivered");

    let config = next_config(&mut bus.outbound).await;
    assert_eq!(config.max_tokens, Some(500));
    assert_eq!(config.temperature, Some(0.7));

    let stored = warda_config::get_agent_config(&bus.store, AgentKey::Id("abc".into()))
        .await
        .expect("stored");
    assert_eq!(stored, config);
}

#[tokio::test]
async fn malformed_and_unknown_packets_do_not_stop_the_bus() {
    let mut bus = bus().await;

    let truncated = DataPacket::new(AGENT_CONFIG_TOPIC, b"{\"message\": \"{\\\"agentId".to_vec());
    assert!(matches!(
        bus.router.dispatch(truncated),
        Err(BusError::MalformedEnvelope(_))
    ));
    let bad_patch = DataPacket::new(
        AGENT_CONFIG_TOPIC,
        json!({"message": "{\"temperature\": \"hot\"}"}).to_string().into_bytes(),
    );
    assert!(bus.router.dispatch(bad_patch).is_err());
    assert!(matches!(
        bus.router.dispatch(DataPacket::new("no-such-topic", b"{}".to_vec())),
        Err(BusError::UnknownTopic(_))
    ));

    let quiet = tokio::time::timeout(Duration::from_millis(100), bus.outbound.recv()).await;
    assert!(quiet.is_err(), "malformed requests get no response");

    bus.router
        .dispatch(config_packet(json!({"agentId": "abc", "topP": 0.3})))
        .expect("delivered");
    assert_eq!(next_config(&mut bus.outbound).await.top_p, Some(0.3));

    assert_eq!(
        bus.router.stats(),
        RouterStats {
            delivered: 1,
            ignored: 0,
            dropped_malformed: 2,
            unknown_topic: 1,
        }
    );
}

#[tokio::test]
async fn receive_loop_serializes_updates_and_drains_on_shutdown() {
    let mut bus = bus().await;
    let (tx, rx) = mpsc::channel(16);
    let loop_handle = bus.router.clone().spawn(rx);

    tx.send(DataPacket::new(CHAT_TOPIC, b"hello".to_vec()))
        .await
        .expect("router alive");
    tx.send(config_packet(json!({"agentId": "abc", "temperature": 0.1})))
        .await
        .expect("router alive");
    tx.send(config_packet(json!({"agentId": "abc", "dialogRound": 3})))
        .await
        .expect("router alive");
    tx.send(config_packet(json!({"agentId": "abc", "agentName": "Warda II"})))
        .await
        .expect("router alive");
    drop(tx);
    loop_handle.await.expect("receive loop exits when the stream ends");

    tokio::time::timeout(Duration::from_secs(2), bus.service.shutdown())
        .await
        .expect("drain finishes");

    let first = next_config(&mut bus.outbound).await;
    let second = next_config(&mut bus.outbound).await;
    let third = next_config(&mut bus.outbound).await;
    assert_eq!(first.temperature, Some(0.1));
    assert_eq!((second.temperature, second.memory_limit), (Some(0.1), Some(3)));
    assert_eq!(third.agent_name, "Warda II");
    assert_eq!(third.memory_limit, Some(3));
    assert_eq!(bus.router.stats().ignored, 1);

    let by_new_name = warda_config::get_agent_config(&bus.store, AgentKey::Name("Warda II".into()))
        .await
        .expect("renamed agent is found by its new name");
    assert_eq!(by_new_name.agent_id, "abc");
}
