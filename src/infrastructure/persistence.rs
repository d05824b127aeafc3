use crate::domain::models::{Habit, HabitPatch, NewHabit, NewTask, Task, TaskPatch};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub type SnapshotCallback<T> = Arc<dyn Fn(Vec<T>) + Send + Sync>;

/// Document store holding a user's tasks and habits.
///
/// Subscribing delivers the full current collection immediately and again after
/// every change for that user. Delivery stops when the returned [`Subscription`]
/// is unsubscribed or dropped.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    fn subscribe_tasks(
        &self,
        user_id: &str,
        callback: SnapshotCallback<Task>,
    ) -> Result<Subscription, InfraError>;

    fn subscribe_habits(
        &self,
        user_id: &str,
        callback: SnapshotCallback<Habit>,
    ) -> Result<Subscription, InfraError>;

    async fn add_task(&self, user_id: &str, task: NewTask) -> Result<String, InfraError>;
    async fn update_task(&self, user_id: &str, id: &str, patch: TaskPatch) -> Result<(), InfraError>;
    async fn delete_task(&self, user_id: &str, id: &str) -> Result<(), InfraError>;

    async fn add_habit(&self, user_id: &str, habit: NewHabit) -> Result<String, InfraError>;
    async fn update_habit(&self, user_id: &str, id: &str, patch: HabitPatch) -> Result<(), InfraError>;
    async fn delete_habit(&self, user_id: &str, id: &str) -> Result<(), InfraError>;
}

/// Handle for a live snapshot subscription.
#[must_use = "dropping a subscription stops snapshot delivery"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

struct Subscriber<T> {
    user_id: String,
    callback: SnapshotCallback<T>,
}

/// Per-user callback registry shared by store implementations.
pub struct SubscriberRegistry<T> {
    next_id: AtomicU64,
    subscribers: Arc<Mutex<HashMap<u64, Subscriber<T>>>>,
}

impl<T> Default for SubscriberRegistry<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T: Clone + Send + 'static> SubscriberRegistry<T> {
    pub fn register(&self, user_id: &str, callback: SnapshotCallback<T>) -> Result<Subscription, InfraError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut subscribers = self
                .subscribers
                .lock()
                .map_err(|error| InfraError::Persistence(format!("subscriber lock poisoned: {error}")))?;
            subscribers.insert(
                id,
                Subscriber {
                    user_id: user_id.to_string(),
                    callback,
                },
            );
        }

        let subscribers = Arc::clone(&self.subscribers);
        Ok(Subscription::new(move || {
            if let Ok(mut subscribers) = subscribers.lock() {
                subscribers.remove(&id);
            }
        }))
    }

    pub fn has_subscribers(&self, user_id: &str) -> bool {
        self.subscribers
            .lock()
            .map(|subscribers| subscribers.values().any(|subscriber| subscriber.user_id == user_id))
            .unwrap_or(false)
    }

    /// Sends `snapshot` to every subscriber of `user_id`. Callbacks run outside the registry lock.
    pub fn publish(&self, user_id: &str, snapshot: &[T]) -> Result<(), InfraError> {
        let callbacks: Vec<SnapshotCallback<T>> = {
            let subscribers = self
                .subscribers
                .lock()
                .map_err(|error| InfraError::Persistence(format!("subscriber lock poisoned: {error}")))?;
            subscribers
                .values()
                .filter(|subscriber| subscriber.user_id == user_id)
                .map(|subscriber| Arc::clone(&subscriber.callback))
                .collect()
        };
        for callback in callbacks {
            callback(snapshot.to_vec());
        }
        Ok(())
    }
}
