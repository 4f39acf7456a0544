use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use nurture_core::domain::conversation::ConversationId;
use nurture_core::errors::ApplicationError;

type Registry = Arc<Mutex<HashMap<ConversationId, Arc<AsyncMutex<()>>>>>;

/// One async mutex per conversation id, created on demand and dropped once
/// nobody holds or waits on it.
#[derive(Clone, Debug, Default)]
pub struct ConversationLocks {
    entries: Registry,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(
        &self,
        conversation_id: &ConversationId,
        timeout: Duration,
    ) -> Result<ConversationGuard, ApplicationError> {
        let handle =
            lock_registry(&self.entries).entry(conversation_id.clone()).or_default().clone();

        match tokio::time::timeout(timeout, handle.clone().lock_owned()).await {
            Ok(guard) => {
                debug!(
                    event_name = "agent.lock.acquired",
                    conversation_id = %conversation_id.0,
                    "conversation lock acquired"
                );
                Ok(ConversationGuard {
                    conversation_id: conversation_id.clone(),
                    guard: Some(guard),
                    handle: Some(handle),
                    entries: self.entries.clone(),
                })
            }
            Err(_) => {
                prune(&self.entries, conversation_id, handle);
                let waited_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(
                    event_name = "agent.lock.timeout",
                    conversation_id = %conversation_id.0,
                    waited_ms,
                    "conversation lock wait exceeded"
                );
                Err(ApplicationError::ConcurrencyConflict {
                    conversation_id: conversation_id.0.clone(),
                    waited_ms,
                })
            }
        }
    }

    /// Conversations with a current holder or waiter.
    pub fn len(&self) -> usize {
        lock_registry(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive hold on one conversation; released on drop.
#[derive(Debug)]
pub struct ConversationGuard {
    conversation_id: ConversationId,
    guard: Option<OwnedMutexGuard<()>>,
    handle: Option<Arc<AsyncMutex<()>>>,
    entries: Registry,
}

impl ConversationGuard {
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        if let Some(handle) = self.handle.take() {
            prune(&self.entries, &self.conversation_id, handle);
        }
    }
}

fn lock_registry(
    entries: &Registry,
) -> MutexGuard<'_, HashMap<ConversationId, Arc<AsyncMutex<()>>>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the entry when the registry and `handle` hold its only references.
fn prune(entries: &Registry, conversation_id: &ConversationId, handle: Arc<AsyncMutex<()>>) {
    let mut registry = lock_registry(entries);
    let idle = registry
        .get(conversation_id)
        .is_some_and(|entry| Arc::ptr_eq(entry, &handle) && Arc::strong_count(&handle) == 2);
    drop(handle);
    if idle {
        registry.remove(conversation_id);
    }
}
