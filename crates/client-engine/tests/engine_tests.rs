//! Engine scenario tests against a scripted transport

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use client_engine::{
    BlockPatch, EngineConfig, EngineEvent, EngineStatus, MemoryStorage, SignIn, Storage,
    SyncEngine, SyncTransport, TransportError,
};
use core_models::{
    Applied, Block, ConflictReport, ConflictResolution, PullResponse, PushPayload, PushResponse,
    RecordKind, UserInfo,
};
use uuid::Uuid;

fn test_user() -> UserInfo {
    UserInfo {
        id: Uuid::new_v4(),
        email: "user@example.com".to_string(),
        name: "Test User".to_string(),
        image: None,
    }
}

fn server_block(id: &str, text: &str, version: i64, at: DateTime<Utc>) -> Block {
    Block {
        id: id.to_string(),
        text: text.to_string(),
        created_at: at,
        calendar_event_id: None,
        position: 0,
        version,
        updated_at: at,
        deleted_at: None,
        client_id: Some("other".to_string()),
    }
}

fn empty_pull(at: DateTime<Utc>) -> PullResponse {
    PullResponse {
        blocks: vec![],
        tomorrow_tasks: vec![],
        settings: None,
        conflicts: vec![],
        synced_at: at,
    }
}

fn accept_all(payload: &PushPayload) -> PushResponse {
    PushResponse {
        success: true,
        applied: Applied {
            blocks: payload
                .blocks
                .iter()
                .flatten()
                .map(|b| b.id.clone())
                .collect(),
            tomorrow_tasks: payload
                .tomorrow_tasks
                .iter()
                .flatten()
                .map(|t| t.id.clone())
                .collect(),
            settings: payload.settings.is_some(),
        },
        conflicts: vec![],
    }
}

/// Scripted server: queued responses with accept-everything defaults.
#[derive(Default)]
struct MockTransport {
    calls: Mutex<Vec<String>>,
    pushes: Mutex<Vec<PushPayload>>,
    pull_cursors: Mutex<Vec<Option<DateTime<Utc>>>>,
    push_queue: Mutex<VecDeque<Result<PushResponse, TransportError>>>,
    pull_queue: Mutex<VecDeque<PullResponse>>,
    full_queue: Mutex<VecDeque<PullResponse>>,
    me_queue: Mutex<VecDeque<Result<UserInfo, TransportError>>>,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn queue_push(&self, result: Result<PushResponse, TransportError>) {
        self.push_queue.lock().unwrap().push_back(result);
    }

    fn queue_pull(&self, response: PullResponse) {
        self.pull_queue.lock().unwrap().push_back(response);
    }

    fn queue_full(&self, response: PullResponse) {
        self.full_queue.lock().unwrap().push_back(response);
    }

    fn queue_me(&self, result: Result<UserInfo, TransportError>) {
        self.me_queue.lock().unwrap().push_back(result);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn pushes(&self) -> Vec<PushPayload> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn sign_in_google(&self, _id_token: &str) -> Result<SignIn, TransportError> {
        self.calls.lock().unwrap().push("signIn".to_string());
        Ok(SignIn {
            token: "test-token".to_string(),
            user: test_user(),
        })
    }

    async fn me(&self, _token: &str) -> Result<UserInfo, TransportError> {
        self.calls.lock().unwrap().push("me".to_string());
        match self.me_queue.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(test_user()),
        }
    }

    async fn push(
        &self,
        _token: &str,
        payload: &PushPayload,
    ) -> Result<PushResponse, TransportError> {
        self.calls.lock().unwrap().push("push".to_string());
        self.pushes.lock().unwrap().push(payload.clone());
        match self.push_queue.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(accept_all(payload)),
        }
    }

    async fn pull(
        &self,
        _token: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<PullResponse, TransportError> {
        self.calls.lock().unwrap().push("pull".to_string());
        self.pull_cursors.lock().unwrap().push(since);
        match self.pull_queue.lock().unwrap().pop_front() {
            Some(response) => Ok(response),
            None => Ok(empty_pull(Utc::now())),
        }
    }

    async fn full(&self, _token: &str) -> Result<PullResponse, TransportError> {
        self.calls.lock().unwrap().push("full".to_string());
        match self.full_queue.lock().unwrap().pop_front() {
            Some(response) => Ok(response),
            None => Ok(empty_pull(Utc::now())),
        }
    }

    async fn resolve_conflict(
        &self,
        _token: &str,
        _conflict_id: Uuid,
        _resolution: ConflictResolution,
    ) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push("resolveConflict".to_string());
        Ok(())
    }
}

/// Long timers so only explicit sync() calls hit the transport.
fn slow_config() -> EngineConfig {
    EngineConfig {
        debounce: Duration::from_secs(600),
        sync_interval: Duration::from_secs(600),
    }
}

async fn signed_in_engine(transport: Arc<MockTransport>) -> SyncEngine {
    let engine = SyncEngine::new(Arc::new(MemoryStorage::new()), transport, slow_config());
    engine.initialize().await.unwrap();
    engine.sign_in("id-token").await.unwrap();
    engine
}

#[tokio::test]
async fn fresh_write_is_pushed_and_marked_synced() {
    let transport = MockTransport::new();
    let engine = signed_in_engine(transport.clone()).await;

    engine
        .save_block(
            "b1",
            BlockPatch {
                text: Some("hello".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // The server stores the accepted write at version 2 and echoes it back
    let at = Utc::now();
    let mut echoed = server_block("b1", "hello", 2, at);
    echoed.client_id = Some(engine.client_id().await);
    transport.queue_pull(PullResponse {
        blocks: vec![echoed],
        tomorrow_tasks: vec![],
        settings: None,
        conflicts: vec![],
        synced_at: at,
    });

    engine.sync().await.unwrap();

    let pushes = transport.pushes();
    assert_eq!(pushes.len(), 1);
    let pushed = &pushes[0].blocks.as_ref().unwrap()[0];
    assert_eq!(pushed.id, "b1");
    assert_eq!(pushed.version, 1);
    assert_eq!(pushed.client_id.as_deref(), Some(pushes[0].client_id.as_str()));

    let blocks = engine.get_blocks().await;
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].text, "hello");
    assert_eq!(blocks[0].version, 2);
    assert_eq!(engine.status(), EngineStatus::Idle);
}

#[tokio::test]
async fn failed_sync_keeps_pending_edits_and_retries() {
    let transport = MockTransport::new();
    let engine = signed_in_engine(transport.clone()).await;

    engine
        .save_block(
            "b1",
            BlockPatch {
                text: Some("draft".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    transport.queue_push(Err(TransportError::Network("connection reset".to_string())));
    assert!(engine.sync().await.is_err());
    assert_eq!(engine.status(), EngineStatus::Error);

    // Next trigger retries from unchanged local state
    engine.sync().await.unwrap();
    let pushes = transport.pushes();
    assert_eq!(pushes.len(), 2);
    assert_eq!(
        pushes[1].blocks.as_ref().unwrap()[0].text,
        "draft".to_string()
    );
    assert_eq!(engine.status(), EngineStatus::Idle);
}

#[tokio::test]
async fn conflict_report_flags_record_and_stops_repushing() {
    let transport = MockTransport::new();
    let engine = signed_in_engine(transport.clone()).await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let events_clone = events.clone();
    engine.subscribe(move |event| {
        if matches!(event, EngineEvent::ConflictDetected { .. }) {
            events_clone.lock().unwrap().push(event.clone());
        }
    });

    engine
        .save_block(
            "b1",
            BlockPatch {
                text: Some("B".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    transport.queue_push(Ok(PushResponse {
        success: true,
        applied: Applied::default(),
        conflicts: vec![ConflictReport {
            kind: RecordKind::Block,
            id: "b1".to_string(),
            local_version: 1,
            server_version: 4,
        }],
    }));

    engine.sync().await.unwrap();

    let events = events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![EngineEvent::ConflictDetected {
            kind: RecordKind::Block,
            id: "b1".to_string(),
        }]
    );
    // The local edit remains visible
    assert_eq!(engine.get_blocks().await[0].text, "B");

    // A conflicted record is not pushed again on the next cycle
    engine.sync().await.unwrap();
    assert_eq!(transport.pushes().len(), 1);
}

#[tokio::test]
async fn pulled_tombstone_hides_block() {
    let transport = MockTransport::new();
    let engine = signed_in_engine(transport.clone()).await;

    let t1 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    transport.queue_pull(PullResponse {
        blocks: vec![server_block("b1", "x", 2, t1)],
        tomorrow_tasks: vec![],
        settings: None,
        conflicts: vec![],
        synced_at: t1,
    });
    engine.sync().await.unwrap();
    assert_eq!(engine.get_blocks().await.len(), 1);

    let t2 = t1 + ChronoDuration::minutes(1);
    let mut dead = server_block("b1", "x", 3, t2);
    dead.deleted_at = Some(t2);
    transport.queue_pull(PullResponse {
        blocks: vec![dead],
        tomorrow_tasks: vec![],
        settings: None,
        conflicts: vec![],
        synced_at: t2,
    });
    engine.sync().await.unwrap();

    assert!(engine.get_blocks().await.is_empty());
}

#[tokio::test]
async fn sign_in_pushes_pending_edits_before_full_sync() {
    let transport = MockTransport::new();
    let engine = SyncEngine::new(
        Arc::new(MemoryStorage::new()),
        transport.clone(),
        slow_config(),
    );
    engine.initialize().await.unwrap();

    // Signed-out local edits
    for (id, text) in [("b1", "one"), ("b2", "two"), ("b3", "three")] {
        engine
            .save_block(
                id,
                BlockPatch {
                    text: Some(text.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    // Server already held one block; full sync returns everything
    let at = Utc::now();
    transport.queue_full(PullResponse {
        blocks: vec![
            server_block("b1", "one", 2, at),
            server_block("b2", "two", 2, at),
            server_block("b3", "three", 2, at),
            server_block("b0", "existing", 5, at),
        ],
        tomorrow_tasks: vec![],
        settings: None,
        conflicts: vec![],
        synced_at: at,
    });

    engine.sign_in("id-token").await.unwrap();

    let calls = transport.calls();
    let push_index = calls.iter().position(|c| c == "push").unwrap();
    let full_index = calls.iter().position(|c| c == "full").unwrap();
    assert!(push_index < full_index, "push must precede full sync");

    let pushes = transport.pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].blocks.as_ref().unwrap().len(), 3);

    let blocks = engine.get_blocks().await;
    assert_eq!(blocks.len(), 4);
    assert!(engine.is_authenticated().await);
}

#[tokio::test]
async fn offline_engine_skips_sync_until_back_online() {
    let transport = MockTransport::new();
    let engine = signed_in_engine(transport.clone()).await;
    let calls_before = transport.calls().len();

    engine.set_online(false).await;
    assert_eq!(engine.status(), EngineStatus::Offline);

    engine
        .save_block(
            "b1",
            BlockPatch {
                text: Some("offline edit".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    engine.sync().await.unwrap();
    assert_eq!(transport.calls().len(), calls_before, "no traffic while offline");

    engine.set_online(true).await;
    let pushes = transport.pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].blocks.as_ref().unwrap()[0].text, "offline edit");
}

#[tokio::test]
async fn pull_cursor_advances_to_synced_at() {
    let transport = MockTransport::new();
    let engine = signed_in_engine(transport.clone()).await;

    let t1 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    transport.queue_pull(empty_pull(t1));
    engine.sync().await.unwrap();
    engine.sync().await.unwrap();

    let cursors = transport.pull_cursors.lock().unwrap().clone();
    assert_eq!(cursors.len(), 2);
    assert_eq!(cursors[1], Some(t1));
}

#[tokio::test]
async fn initialize_restores_replica_and_keeps_client_id() {
    let storage = Arc::new(MemoryStorage::new());
    let transport = MockTransport::new();

    let engine = SyncEngine::new(storage.clone(), transport.clone(), slow_config());
    engine.initialize().await.unwrap();
    let client_id = engine.client_id().await;
    engine
        .save_block(
            "b1",
            BlockPatch {
                text: Some("persisted".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    drop(engine);

    let engine = SyncEngine::new(storage, transport, slow_config());
    engine.initialize().await.unwrap();
    assert_eq!(engine.client_id().await, client_id);
    let blocks = engine.get_blocks().await;
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].text, "persisted");
}

#[tokio::test]
async fn initialize_clears_rejected_token() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set("auth-token", "stale").unwrap();

    let transport = MockTransport::new();
    transport.queue_me(Err(TransportError::Unauthorized));

    let engine = SyncEngine::new(storage.clone(), transport, slow_config());
    engine.initialize().await.unwrap();

    assert!(!engine.is_authenticated().await);
    assert!(storage.get("auth-token").unwrap().is_none());
}

#[tokio::test]
async fn status_events_bracket_data_events() {
    let transport = MockTransport::new();
    let engine = signed_in_engine(transport.clone()).await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let events_clone = events.clone();
    engine.subscribe(move |event| {
        events_clone.lock().unwrap().push(event.clone());
    });

    let at = Utc::now();
    transport.queue_pull(PullResponse {
        blocks: vec![server_block("b9", "from server", 2, at)],
        tomorrow_tasks: vec![],
        settings: None,
        conflicts: vec![],
        synced_at: at,
    });
    engine.sync().await.unwrap();

    let events = events.lock().unwrap().clone();
    assert_eq!(events.first(), Some(&EngineEvent::StatusChange(EngineStatus::Syncing)));
    assert_eq!(events.last(), Some(&EngineEvent::StatusChange(EngineStatus::Idle)));
    assert!(events.contains(&EngineEvent::BlocksUpdated));
}
