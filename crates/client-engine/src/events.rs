//! Event fan-out to UI collaborators
//!
//! A plain observer list: register a handler, receive events in emission
//! order, unregister with the returned id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use core_models::RecordKind;

use crate::engine::EngineStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    StatusChange(EngineStatus),
    BlocksUpdated,
    TomorrowTasksUpdated,
    SettingsUpdated,
    ConflictDetected { kind: RecordKind, id: String },
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

#[derive(Default)]
pub struct Emitter {
    handlers: Mutex<Vec<(SubscriptionId, Handler)>>,
    next_id: AtomicU64,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        handler: impl Fn(&EngineEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().unwrap().push((id, Arc::new(handler)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.handlers.lock().unwrap().retain(|(hid, _)| *hid != id);
    }

    pub fn emit(&self, event: &EngineEvent) {
        // Snapshot under the lock, call outside it; a handler may
        // subscribe or unsubscribe reentrantly.
        let handlers: Vec<Handler> = self
            .handlers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handlers_receive_events_in_order_until_unsubscribed() {
        let emitter = Emitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        let id = emitter.subscribe(move |event| {
            seen_clone.lock().unwrap().push(event.clone());
        });

        emitter.emit(&EngineEvent::BlocksUpdated);
        emitter.emit(&EngineEvent::SettingsUpdated);
        emitter.unsubscribe(id);
        emitter.emit(&EngineEvent::TomorrowTasksUpdated);

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![EngineEvent::BlocksUpdated, EngineEvent::SettingsUpdated]
        );
    }
}
