//! The sync engine
//!
//! Single source of truth on the client. Editors mutate through it, UI
//! collaborators subscribe to it, and it reconciles the local replica with
//! the server on triggers: a debounced tick after each edit, a periodic
//! interval, connectivity changes, and foreground signals. At most one sync
//! runs at a time per engine instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use core_models::{
    block_order, task_order, Block, BlockChange, ConflictResolution, PullResponse, PushPayload,
    RecordKind, Settings, SyncConflict, SyncState, SyncStatus, Theme, TomorrowTask,
    TomorrowTaskChange, UserInfo,
};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::events::{Emitter, EngineEvent, SubscriptionId};
use crate::import::blocks_from_plain_text;
use crate::merge::{merge_records, merge_settings};
use crate::records::{LocalRecord, LocalSettings};
use crate::storage::{keys, load_json, store_json, Storage};
use crate::transport::{SyncTransport, TransportError};
use crate::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Idle,
    Syncing,
    Error,
    Offline,
}

/// Engine timing knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Quiescence window after an edit before syncing
    pub debounce: Duration,
    /// Periodic background sync interval
    pub sync_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(1),
            sync_interval: Duration::from_secs(30),
        }
    }
}

/// Partial update for a block. Unset fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct BlockPatch {
    pub text: Option<String>,
    /// Only honored when the block does not exist yet; authored timestamps
    /// are stable across edits
    pub created_at: Option<DateTime<Utc>>,
    pub position: Option<i32>,
    /// `Some(None)` clears the handle
    pub calendar_event_id: Option<Option<String>>,
}

/// Partial update for a tomorrow task.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub text: Option<String>,
    /// `Some(None)` clears the time
    pub time: Option<Option<String>>,
    pub position: Option<i32>,
}

/// Partial update for settings.
#[derive(Debug, Clone, Default)]
pub struct SettingsPatch {
    pub theme: Option<Theme>,
    pub day_cut_hour: Option<u8>,
}

struct LocalState {
    blocks: HashMap<String, LocalRecord<Block>>,
    tasks: HashMap<String, LocalRecord<TomorrowTask>>,
    settings: Option<LocalSettings>,
    sync_state: SyncState,
    conflicts: Vec<SyncConflict>,
    token: Option<String>,
    user: Option<UserInfo>,
}

impl Default for LocalState {
    fn default() -> Self {
        Self {
            blocks: HashMap::new(),
            tasks: HashMap::new(),
            settings: None,
            sync_state: SyncState::new(String::new()),
            conflicts: Vec::new(),
            token: None,
            user: None,
        }
    }
}

struct Inner {
    storage: Arc<dyn Storage>,
    transport: Arc<dyn SyncTransport>,
    emitter: Emitter,
    state: RwLock<LocalState>,
    status: StdMutex<EngineStatus>,
    online: AtomicBool,
    /// At most one sync in flight per engine
    sync_gate: AsyncMutex<()>,
    debounce: StdMutex<Option<JoinHandle<()>>>,
    ticker: StdMutex<Option<JoinHandle<()>>>,
    config: EngineConfig,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.debounce.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = self.ticker.lock().unwrap().take() {
            handle.abort();
        }
    }
}

/// One engine per user session; pass it to collaborators explicitly.
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        transport: Arc<dyn SyncTransport>,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                transport,
                emitter: Emitter::new(),
                state: RwLock::new(LocalState::default()),
                status: StdMutex::new(EngineStatus::Idle),
                online: AtomicBool::new(true),
                sync_gate: AsyncMutex::new(()),
                debounce: StdMutex::new(None),
                ticker: StdMutex::new(None),
                config,
            }),
        }
    }

    /// Load the persisted replica, validate any stored token, and start the
    /// periodic sync.
    pub async fn initialize(&self) -> Result<(), EngineError> {
        let inner = &self.inner;
        {
            let mut state = inner.state.write().await;

            let client_id = match inner.storage.get(keys::CLIENT_ID)? {
                Some(id) if !id.is_empty() => id,
                _ => {
                    let id = Uuid::new_v4().to_string();
                    inner.storage.set(keys::CLIENT_ID, &id)?;
                    id
                }
            };

            state.sync_state = load_json::<SyncState>(&*inner.storage, keys::SYNC_STATE)?
                .unwrap_or_else(|| SyncState::new(client_id.clone()));
            state.sync_state.client_id = client_id;

            state.blocks = load_json::<Vec<LocalRecord<Block>>>(&*inner.storage, keys::BLOCKS)?
                .map(|list| {
                    list.into_iter()
                        .map(|r| (r.record.id.clone(), r))
                        .collect()
                })
                .unwrap_or_default();
            state.tasks =
                load_json::<Vec<LocalRecord<TomorrowTask>>>(&*inner.storage, keys::TOMORROW_TASKS)?
                    .map(|list| {
                        list.into_iter()
                            .map(|r| (r.record.id.clone(), r))
                            .collect()
                    })
                    .unwrap_or_default();
            state.settings = load_json(&*inner.storage, keys::SETTINGS)?;
            state.token = inner.storage.get(keys::AUTH_TOKEN)?;
            state.user = load_json(&*inner.storage, keys::USER)?;
        }

        let token = inner.state.read().await.token.clone();
        if let Some(token) = token {
            match inner.transport.me(&token).await {
                Ok(user) => {
                    store_json(&*inner.storage, keys::USER, &user)?;
                    inner.state.write().await.user = Some(user);
                    self.start_ticker();
                    let _ = inner.sync().await;
                }
                Err(TransportError::Unauthorized) => {
                    tracing::warn!("stored token rejected, clearing");
                    inner.clear_auth().await?;
                }
                Err(e) => {
                    // Unreachable server is not a failed verification; keep
                    // the token and let the periodic sync retry.
                    tracing::debug!("token check unreachable: {e}");
                    self.start_ticker();
                }
            }
        }
        Ok(())
    }

    /// Exchange an id token, then push pending local edits before replacing
    /// local state. The ordering preserves edits made while signed out.
    pub async fn sign_in(&self, id_token: &str) -> Result<UserInfo, EngineError> {
        let inner = &self.inner;
        let signin = inner.transport.sign_in_google(id_token).await?;

        inner.storage.set(keys::AUTH_TOKEN, &signin.token)?;
        store_json(&*inner.storage, keys::USER, &signin.user)?;
        {
            let mut state = inner.state.write().await;
            state.token = Some(signin.token.clone());
            state.user = Some(signin.user.clone());
        }

        // Periodic sync runs from here on, even if the first cycle fails
        self.start_ticker();

        let _gate = inner.sync_gate.lock().await;
        inner.set_status(EngineStatus::Syncing);
        let result = async {
            inner.push_pending(&signin.token).await?;
            inner.run_full_sync(&signin.token).await
        }
        .await;
        drop(_gate);

        match result {
            Ok(()) => inner.set_status(EngineStatus::Idle),
            Err(ref e) => {
                inner.set_status(EngineStatus::Error);
                inner.emitter.emit(&EngineEvent::Error(e.to_string()));
            }
        }
        result?;

        Ok(signin.user)
    }

    /// Drop the token and stop syncing. Local data stays; it becomes the
    /// anonymous baseline.
    pub async fn sign_out(&self) -> Result<(), EngineError> {
        let inner = &self.inner;
        if let Some(handle) = inner.ticker.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = inner.debounce.lock().unwrap().take() {
            handle.abort();
        }
        inner.clear_auth().await?;
        inner.set_status(EngineStatus::Idle);
        Ok(())
    }

    /// Create or update a block and queue it for sync.
    pub async fn save_block(&self, id: &str, patch: BlockPatch) -> Result<Block, EngineError> {
        let inner = &self.inner;
        let now = Utc::now();
        let block = {
            let mut state = inner.state.write().await;
            let client_id = state.sync_state.client_id.clone();

            let block = match state.blocks.get_mut(id) {
                Some(local) => {
                    let record = &mut local.record;
                    if let Some(text) = patch.text {
                        record.text = text;
                    }
                    if let Some(position) = patch.position {
                        record.position = position;
                    }
                    if let Some(handle) = patch.calendar_event_id {
                        record.calendar_event_id = handle;
                    }
                    record.version += 1;
                    record.updated_at = now;
                    record.client_id = Some(client_id);
                    local.sync_status = SyncStatus::Pending;
                    record.clone()
                }
                None => {
                    let record = Block {
                        id: id.to_string(),
                        text: patch.text.unwrap_or_default(),
                        created_at: patch.created_at.unwrap_or(now),
                        calendar_event_id: patch.calendar_event_id.flatten(),
                        position: patch.position.unwrap_or(0),
                        version: 1,
                        updated_at: now,
                        deleted_at: None,
                        client_id: Some(client_id),
                    };
                    state
                        .blocks
                        .insert(id.to_string(), LocalRecord::pending(record.clone()));
                    record
                }
            };
            inner.persist_blocks(&state)?;
            block
        };

        inner.emitter.emit(&EngineEvent::BlocksUpdated);
        self.schedule_sync();
        Ok(block)
    }

    /// Tombstone a block. Unknown ids are a no-op.
    pub async fn delete_block(&self, id: &str) -> Result<(), EngineError> {
        let inner = &self.inner;
        let now = Utc::now();
        let deleted = {
            let mut state = inner.state.write().await;
            let client_id = state.sync_state.client_id.clone();
            match state.blocks.get_mut(id) {
                Some(local) => {
                    local.record.deleted_at = Some(now);
                    local.record.updated_at = now;
                    local.record.version += 1;
                    local.record.client_id = Some(client_id);
                    local.sync_status = SyncStatus::Pending;
                    inner.persist_blocks(&state)?;
                    true
                }
                None => false,
            }
        };

        if deleted {
            inner.emitter.emit(&EngineEvent::BlocksUpdated);
            self.schedule_sync();
        }
        Ok(())
    }

    pub async fn save_tomorrow_task(
        &self,
        id: &str,
        patch: TaskPatch,
    ) -> Result<TomorrowTask, EngineError> {
        if let Some(time) = &patch.time {
            core_models::validate_task_time(time.as_deref())?;
        }
        let inner = &self.inner;
        let now = Utc::now();
        let task = {
            let mut state = inner.state.write().await;
            let client_id = state.sync_state.client_id.clone();

            let task = match state.tasks.get_mut(id) {
                Some(local) => {
                    let record = &mut local.record;
                    if let Some(text) = patch.text {
                        record.text = text;
                    }
                    if let Some(time) = patch.time {
                        record.time = time;
                    }
                    if let Some(position) = patch.position {
                        record.position = position;
                    }
                    record.version += 1;
                    record.updated_at = now;
                    record.client_id = Some(client_id);
                    local.sync_status = SyncStatus::Pending;
                    record.clone()
                }
                None => {
                    let record = TomorrowTask {
                        id: id.to_string(),
                        text: patch.text.unwrap_or_default(),
                        time: patch.time.flatten(),
                        position: patch.position.unwrap_or(0),
                        version: 1,
                        updated_at: now,
                        deleted_at: None,
                        client_id: Some(client_id),
                    };
                    state
                        .tasks
                        .insert(id.to_string(), LocalRecord::pending(record.clone()));
                    record
                }
            };
            inner.persist_tasks(&state)?;
            task
        };

        inner.emitter.emit(&EngineEvent::TomorrowTasksUpdated);
        self.schedule_sync();
        Ok(task)
    }

    pub async fn delete_tomorrow_task(&self, id: &str) -> Result<(), EngineError> {
        let inner = &self.inner;
        let now = Utc::now();
        let deleted = {
            let mut state = inner.state.write().await;
            let client_id = state.sync_state.client_id.clone();
            match state.tasks.get_mut(id) {
                Some(local) => {
                    local.record.deleted_at = Some(now);
                    local.record.updated_at = now;
                    local.record.version += 1;
                    local.record.client_id = Some(client_id);
                    local.sync_status = SyncStatus::Pending;
                    inner.persist_tasks(&state)?;
                    true
                }
                None => false,
            }
        };

        if deleted {
            inner.emitter.emit(&EngineEvent::TomorrowTasksUpdated);
            self.schedule_sync();
        }
        Ok(())
    }

    pub async fn save_settings(&self, patch: SettingsPatch) -> Result<Settings, EngineError> {
        let inner = &self.inner;
        let now = Utc::now();
        let settings = {
            let mut state = inner.state.write().await;
            let mut settings = state
                .settings
                .as_ref()
                .map(|s| s.settings.clone())
                .unwrap_or_default();
            if let Some(theme) = patch.theme {
                settings.theme = theme;
            }
            if let Some(hour) = patch.day_cut_hour {
                settings.day_cut_hour = hour;
            }
            settings.updated_at = now;
            settings.validate()?;
            state.settings = Some(LocalSettings {
                settings: settings.clone(),
                sync_status: SyncStatus::Pending,
            });
            inner.persist_settings(&state)?;
            settings
        };

        inner.emitter.emit(&EngineEvent::SettingsUpdated);
        self.schedule_sync();
        Ok(settings)
    }

    /// Import a pre-sync plain-text log: one pending block per line, pushed
    /// as a single batch on the next sync.
    pub async fn import_plain_text(&self, text: &str) -> Result<usize, EngineError> {
        let inner = &self.inner;
        let now = Utc::now();
        let count = {
            let mut state = inner.state.write().await;
            let client_id = state.sync_state.client_id.clone();
            let blocks = blocks_from_plain_text(text, &client_id, now);
            let count = blocks.len();
            for block in blocks {
                state
                    .blocks
                    .insert(block.id.clone(), LocalRecord::pending(block));
            }
            inner.persist_blocks(&state)?;
            count
        };

        if count > 0 {
            inner.emitter.emit(&EngineEvent::BlocksUpdated);
            self.schedule_sync();
        }
        Ok(count)
    }

    /// Run one push/pull cycle now. Collapses onto an in-flight run.
    pub async fn sync(&self) -> Result<(), EngineError> {
        self.inner.sync().await
    }

    /// Replace local state with the server's live records.
    pub async fn full_sync(&self) -> Result<(), EngineError> {
        let inner = &self.inner;
        let Some(token) = inner.state.read().await.token.clone() else {
            return Ok(());
        };

        let _gate = inner.sync_gate.lock().await;
        inner.set_status(EngineStatus::Syncing);
        match inner.run_full_sync(&token).await {
            Ok(()) => {
                inner.set_status(EngineStatus::Idle);
                Ok(())
            }
            Err(e) => {
                inner.set_status(EngineStatus::Error);
                inner.emitter.emit(&EngineEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Report a conflict as settled. Bookkeeping only; the keep-both row
    /// already exists.
    pub async fn resolve_conflict(
        &self,
        conflict_id: Uuid,
        resolution: ConflictResolution,
    ) -> Result<(), EngineError> {
        let inner = &self.inner;
        let Some(token) = inner.state.read().await.token.clone() else {
            return Ok(());
        };
        inner
            .transport
            .resolve_conflict(&token, conflict_id, resolution)
            .await?;
        inner
            .state
            .write()
            .await
            .conflicts
            .retain(|c| c.id != conflict_id);
        Ok(())
    }

    /// Connectivity signal from the platform.
    pub async fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
        if online {
            self.inner.set_status(EngineStatus::Idle);
            let _ = self.inner.sync().await;
        } else {
            self.inner.set_status(EngineStatus::Offline);
        }
    }

    /// Application came to the foreground.
    pub async fn handle_foreground(&self) {
        let _ = self.inner.sync().await;
    }

    // ------------------------------------------------------------------
    // Accessors: UI collaborators read through these, never the storage.
    // ------------------------------------------------------------------

    /// Live blocks in presentation order.
    pub async fn get_blocks(&self) -> Vec<Block> {
        let state = self.inner.state.read().await;
        let mut blocks: Vec<Block> = state
            .blocks
            .values()
            .filter(|l| !l.record.is_deleted())
            .map(|l| l.record.clone())
            .collect();
        blocks.sort_by(block_order);
        blocks
    }

    /// Live tasks in presentation order.
    pub async fn get_tomorrow_tasks(&self) -> Vec<TomorrowTask> {
        let state = self.inner.state.read().await;
        let mut tasks: Vec<TomorrowTask> = state
            .tasks
            .values()
            .filter(|l| !l.record.is_deleted())
            .map(|l| l.record.clone())
            .collect();
        tasks.sort_by(task_order);
        tasks
    }

    pub async fn get_settings(&self) -> Settings {
        self.inner
            .state
            .read()
            .await
            .settings
            .as_ref()
            .map(|s| s.settings.clone())
            .unwrap_or_default()
    }

    /// Unresolved conflicts reported by the server.
    pub async fn get_conflicts(&self) -> Vec<SyncConflict> {
        self.inner.state.read().await.conflicts.clone()
    }

    pub fn status(&self) -> EngineStatus {
        *self.inner.status.lock().unwrap()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.state.read().await.token.is_some()
    }

    pub async fn client_id(&self) -> String {
        self.inner.state.read().await.sync_state.client_id.clone()
    }

    pub async fn current_user(&self) -> Option<UserInfo> {
        self.inner.state.read().await.user.clone()
    }

    pub fn subscribe(
        &self,
        handler: impl Fn(&EngineEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.emitter.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.emitter.unsubscribe(id)
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Debounced sync: reset the timer on every edit; one run after
    /// quiescence.
    fn schedule_sync(&self) {
        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.config.debounce;
        let mut slot = self.inner.debounce.lock().unwrap();
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                let _ = inner.sync().await;
            }
        }));
    }

    fn start_ticker(&self) {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.sync_interval;
        let mut slot = self.inner.ticker.lock().unwrap();
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await; // first tick is immediate
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let _ = inner.sync().await;
            }
        }));
    }
}

impl Inner {
    async fn sync(&self) -> Result<(), EngineError> {
        // Collapse concurrent triggers onto the in-flight run
        let Ok(_gate) = self.sync_gate.try_lock() else {
            tracing::debug!("sync already in flight");
            return Ok(());
        };
        if !self.online.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(token) = self.state.read().await.token.clone() else {
            return Ok(());
        };

        self.set_status(EngineStatus::Syncing);
        match self.run_sync(&token).await {
            Ok(()) => {
                self.set_status(EngineStatus::Idle);
                Ok(())
            }
            Err(EngineError::Transport(TransportError::Unauthorized)) => {
                tracing::warn!("bearer token rejected, signing out");
                self.clear_auth().await?;
                self.set_status(EngineStatus::Idle);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("sync failed: {e}");
                self.set_status(EngineStatus::Error);
                self.emitter.emit(&EngineEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Push before pull, so the pull snapshot reflects our own writes.
    async fn run_sync(&self, token: &str) -> Result<(), EngineError> {
        self.push_pending(token).await?;
        let since = self.state.read().await.sync_state.last_synced_at;
        let response = self.transport.pull(token, since).await?;
        self.apply_pull(response, false).await
    }

    async fn run_full_sync(&self, token: &str) -> Result<(), EngineError> {
        let response = self.transport.full(token).await?;
        self.apply_pull(response, true).await
    }

    async fn push_pending(&self, token: &str) -> Result<(), EngineError> {
        // Remember what we pushed; an edit racing the request must not be
        // marked synced by the ack for its predecessor.
        let mut pushed_blocks: HashMap<String, i64> = HashMap::new();
        let mut pushed_tasks: HashMap<String, i64> = HashMap::new();

        let payload = {
            let state = self.state.read().await;
            let blocks: Vec<BlockChange> = state
                .blocks
                .values()
                .filter(|l| l.is_pending())
                .map(|l| {
                    pushed_blocks.insert(l.record.id.clone(), l.record.version);
                    BlockChange::from(l.record.clone())
                })
                .collect();
            let tasks: Vec<TomorrowTaskChange> = state
                .tasks
                .values()
                .filter(|l| l.is_pending())
                .map(|l| {
                    pushed_tasks.insert(l.record.id.clone(), l.record.version);
                    TomorrowTaskChange::from(l.record.clone())
                })
                .collect();
            let settings = state
                .settings
                .as_ref()
                .filter(|s| s.sync_status == SyncStatus::Pending)
                .map(|s| s.settings.clone());

            PushPayload {
                client_id: state.sync_state.client_id.clone(),
                blocks: (!blocks.is_empty()).then_some(blocks),
                tomorrow_tasks: (!tasks.is_empty()).then_some(tasks),
                settings,
            }
        };

        if payload.is_empty() {
            return Ok(());
        }

        let response = self.transport.push(token, &payload).await?;

        let mut blocks_changed = false;
        let mut tasks_changed = false;
        let mut settings_changed = false;
        {
            let mut state = self.state.write().await;

            for id in &response.applied.blocks {
                if let Some(local) = state.blocks.get_mut(id) {
                    if pushed_blocks.get(id) == Some(&local.record.version) {
                        local.sync_status = SyncStatus::Synced;
                        local.server_version = Some(local.record.version);
                        blocks_changed = true;
                    }
                }
            }
            for id in &response.applied.tomorrow_tasks {
                if let Some(local) = state.tasks.get_mut(id) {
                    if pushed_tasks.get(id) == Some(&local.record.version) {
                        local.sync_status = SyncStatus::Synced;
                        local.server_version = Some(local.record.version);
                        tasks_changed = true;
                    }
                }
            }
            if response.applied.settings {
                if let Some(settings) = state.settings.as_mut() {
                    settings.sync_status = SyncStatus::Synced;
                    settings_changed = true;
                }
            }

            for report in &response.conflicts {
                match report.kind {
                    RecordKind::Block => {
                        if let Some(local) = state.blocks.get_mut(&report.id) {
                            local.sync_status = SyncStatus::Conflict;
                            local.server_version = Some(report.server_version);
                            blocks_changed = true;
                        }
                    }
                    RecordKind::TomorrowTask => {
                        if let Some(local) = state.tasks.get_mut(&report.id) {
                            local.sync_status = SyncStatus::Conflict;
                            local.server_version = Some(report.server_version);
                            tasks_changed = true;
                        }
                    }
                }
            }

            if blocks_changed {
                self.persist_blocks(&state)?;
            }
            if tasks_changed {
                self.persist_tasks(&state)?;
            }
            if settings_changed {
                self.persist_settings(&state)?;
            }
        }

        if blocks_changed {
            self.emitter.emit(&EngineEvent::BlocksUpdated);
        }
        if tasks_changed {
            self.emitter.emit(&EngineEvent::TomorrowTasksUpdated);
        }
        if settings_changed {
            self.emitter.emit(&EngineEvent::SettingsUpdated);
        }
        for report in &response.conflicts {
            self.emitter.emit(&EngineEvent::ConflictDetected {
                kind: report.kind,
                id: report.id.clone(),
            });
        }

        Ok(())
    }

    async fn apply_pull(&self, response: PullResponse, full: bool) -> Result<(), EngineError> {
        let mut events = Vec::new();
        {
            let mut state = self.state.write().await;

            if full {
                state.blocks = response
                    .blocks
                    .into_iter()
                    .map(|b| {
                        let version = b.version;
                        (b.id.clone(), LocalRecord::synced(b, version))
                    })
                    .collect();
                state.tasks = response
                    .tomorrow_tasks
                    .into_iter()
                    .map(|t| {
                        let version = t.version;
                        (t.id.clone(), LocalRecord::synced(t, version))
                    })
                    .collect();
                if let Some(settings) = response.settings {
                    state.settings = Some(LocalSettings {
                        settings,
                        sync_status: SyncStatus::Synced,
                    });
                }
                events.push(EngineEvent::BlocksUpdated);
                events.push(EngineEvent::TomorrowTasksUpdated);
                events.push(EngineEvent::SettingsUpdated);
            } else {
                let blocks = merge_records(&mut state.blocks, response.blocks);
                if blocks.changed {
                    events.push(EngineEvent::BlocksUpdated);
                }
                for id in blocks.conflicts {
                    events.push(EngineEvent::ConflictDetected {
                        kind: RecordKind::Block,
                        id,
                    });
                }

                let tasks = merge_records(&mut state.tasks, response.tomorrow_tasks);
                if tasks.changed {
                    events.push(EngineEvent::TomorrowTasksUpdated);
                }
                for id in tasks.conflicts {
                    events.push(EngineEvent::ConflictDetected {
                        kind: RecordKind::TomorrowTask,
                        id,
                    });
                }

                if merge_settings(&mut state.settings, response.settings) {
                    events.push(EngineEvent::SettingsUpdated);
                }
            }

            state.conflicts = response.conflicts;
            state.sync_state.last_synced_at = Some(response.synced_at);

            self.persist_blocks(&state)?;
            self.persist_tasks(&state)?;
            self.persist_settings(&state)?;
            store_json(&*self.storage, keys::SYNC_STATE, &state.sync_state)?;
        }

        for event in &events {
            self.emitter.emit(event);
        }
        Ok(())
    }

    async fn clear_auth(&self) -> Result<(), EngineError> {
        self.storage.remove(keys::AUTH_TOKEN)?;
        self.storage.remove(keys::USER)?;
        let mut state = self.state.write().await;
        state.token = None;
        state.user = None;
        Ok(())
    }

    fn set_status(&self, status: EngineStatus) {
        let changed = {
            let mut current = self.status.lock().unwrap();
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        };
        if changed {
            self.emitter.emit(&EngineEvent::StatusChange(status));
        }
    }

    fn persist_blocks(&self, state: &LocalState) -> Result<(), EngineError> {
        let list: Vec<&LocalRecord<Block>> = state.blocks.values().collect();
        store_json(&*self.storage, keys::BLOCKS, &list)
    }

    fn persist_tasks(&self, state: &LocalState) -> Result<(), EngineError> {
        let list: Vec<&LocalRecord<TomorrowTask>> = state.tasks.values().collect();
        store_json(&*self.storage, keys::TOMORROW_TASKS, &list)
    }

    fn persist_settings(&self, state: &LocalState) -> Result<(), EngineError> {
        match &state.settings {
            Some(settings) => store_json(&*self.storage, keys::SETTINGS, settings),
            None => Ok(()),
        }
    }
}
