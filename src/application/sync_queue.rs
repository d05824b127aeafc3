use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::task_event_window;
use crate::infrastructure::google_calendar_client::CalendarGateway;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Duration as TokioDuration, sleep};

const OUTCOME_CHANNEL_CAPACITY: usize = 64;
const HISTORY_CAPACITY: usize = 200;

pub type JobId = u64;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

/// A task to mirror as a one-hour calendar event.
#[derive(Debug, Clone)]
pub struct CalendarSyncJob {
    pub access_token: String,
    pub title: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status", content = "detail")]
pub enum SyncResult {
    Created(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub job_id: JobId,
    pub title: String,
    pub date: NaiveDate,
    pub result: SyncResult,
}

struct QueuedJob {
    id: JobId,
    job: CalendarSyncJob,
}

/// Background worker that creates calendar events for saved tasks.
///
/// Every job ends in exactly one [`SyncOutcome`], published on the broadcast channel
/// and appended to the history, which keeps the most recent outcomes only. A failed
/// job never affects the saved task.
pub struct CalendarSyncQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<QueuedJob>>>,
    outcomes: broadcast::Sender<SyncOutcome>,
    history: Arc<Mutex<VecDeque<SyncOutcome>>>,
    next_job_id: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CalendarSyncQueue {
    /// Starts the worker on the current tokio runtime.
    pub fn spawn(calendar: Arc<dyn CalendarGateway>, retry_policy: RetryPolicy) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        let history = Arc::new(Mutex::new(VecDeque::new()));

        let worker = tokio::spawn(run_worker(
            receiver,
            calendar,
            retry_policy,
            outcomes.clone(),
            Arc::clone(&history),
        ));

        Self {
            sender: Mutex::new(Some(sender)),
            outcomes,
            history,
            next_job_id: AtomicU64::new(1),
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn enqueue(&self, job: CalendarSyncJob) -> Result<JobId, InfraError> {
        let sender = self
            .sender
            .lock()
            .map_err(|error| InfraError::Calendar(format!("sync queue lock poisoned: {error}")))?;
        let Some(sender) = sender.as_ref() else {
            return Err(InfraError::Calendar("sync queue is shut down".to_string()));
        };

        let id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        sender
            .send(QueuedJob { id, job })
            .map_err(|_| InfraError::Calendar("sync queue worker stopped".to_string()))?;
        Ok(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncOutcome> {
        self.outcomes.subscribe()
    }

    pub fn history(&self) -> Result<Vec<SyncOutcome>, InfraError> {
        self.history
            .lock()
            .map(|history| history.iter().cloned().collect())
            .map_err(|error| InfraError::Calendar(format!("sync history lock poisoned: {error}")))
    }

    /// Stops accepting jobs and waits until the queued ones are finished.
    pub async fn shutdown(&self) -> Result<(), InfraError> {
        {
            let mut sender = self
                .sender
                .lock()
                .map_err(|error| InfraError::Calendar(format!("sync queue lock poisoned: {error}")))?;
            sender.take();
        }
        let worker = self
            .worker
            .lock()
            .map_err(|error| InfraError::Calendar(format!("sync worker lock poisoned: {error}")))?
            .take();
        if let Some(worker) = worker {
            worker
                .await
                .map_err(|error| InfraError::Calendar(format!("sync worker failed: {error}")))?;
        }
        Ok(())
    }
}

async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<QueuedJob>,
    calendar: Arc<dyn CalendarGateway>,
    retry_policy: RetryPolicy,
    outcomes: broadcast::Sender<SyncOutcome>,
    history: Arc<Mutex<VecDeque<SyncOutcome>>>,
) {
    while let Some(QueuedJob { id, job }) = receiver.recv().await {
        let result = match create_with_retry(calendar.as_ref(), &retry_policy, &job).await {
            Ok(event_id) => {
                log::info!("calendar event {event_id} created for {:?} on {}", job.title, job.date);
                SyncResult::Created(event_id)
            }
            Err(error) => {
                log::warn!("calendar sync failed for {:?} on {}: {error}", job.title, job.date);
                SyncResult::Failed(error.to_string())
            }
        };

        let outcome = SyncOutcome {
            job_id: id,
            title: job.title,
            date: job.date,
            result,
        };
        if let Ok(mut history) = history.lock() {
            record_outcome(&mut history, outcome.clone());
        }
        // No receivers is fine; the history keeps the outcome.
        let _ = outcomes.send(outcome);
    }
}

fn record_outcome(history: &mut VecDeque<SyncOutcome>, outcome: SyncOutcome) {
    if history.len() == HISTORY_CAPACITY {
        history.pop_front();
    }
    history.push_back(outcome);
}

async fn create_with_retry(
    calendar: &dyn CalendarGateway,
    retry_policy: &RetryPolicy,
    job: &CalendarSyncJob,
) -> Result<String, InfraError> {
    let (start, end) = task_event_window(job.date);
    let max_attempts = retry_policy.max_attempts.max(1);
    let mut attempt: u8 = 0;

    loop {
        match calendar
            .create_event(&job.access_token, &job.title, start, end)
            .await
        {
            Ok(event_id) => return Ok(event_id),
            Err(error) if should_retry(&error) && attempt + 1 < max_attempts => {
                let delay = retry_policy
                    .base_delay_ms
                    .saturating_mul(2u64.saturating_pow(attempt as u32));
                sleep(TokioDuration::from_millis(delay)).await;
                attempt = attempt.saturating_add(1);
            }
            Err(error) => return Err(error),
        }
    }
}

fn should_retry(error: &InfraError) -> bool {
    match error {
        InfraError::Calendar(message) => {
            let message = message.to_ascii_lowercase();
            message.contains("network error")
                || message.contains("timeout")
                || message.contains("timed out")
                || message.contains("temporarily unavailable")
                || message.contains("connection reset")
                || message.contains("http 429")
                || message.contains("http 5")
        }
        _ => false,
    }
}
