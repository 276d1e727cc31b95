use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use todo_core::{StoreEvent, SubscriptionId, Task, TaskId, TaskStore};

use crate::gateway::{NotificationGateway, ScheduledNotification};
use crate::options::{NotificationAction, NotificationOptions};
use crate::worker::VIEW_ACTION;

pub const REMINDER_TITLE: &str = "Todo Reminder";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReminderError {
    #[error("invalid time of day `{0}`, expected HH:MM")]
    InvalidTime(String),
}

/// A reminder resolved against the clock, ready to hand to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderRequest {
    pub task_id: TaskId,
    pub time_of_day: NaiveTime,
    pub fire_at: DateTime<Utc>,
    pub delay: Duration,
}

pub fn parse_time_of_day(input: &str) -> Result<NaiveTime, ReminderError> {
    let trimmed = input.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|_| ReminderError::InvalidTime(trimmed.to_string()))
}

/// The next instant strictly after `now` whose wall-clock time is `at`.
pub fn next_occurrence<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = now.date_naive();
    let candidate = resolve_local(&tz, today.and_time(at));
    if candidate > *now {
        return candidate;
    }
    // On a fall-back day the second pass through `at` may still be ahead.
    if let Some(later) = tz.from_local_datetime(&today.and_time(at)).latest() {
        if later > *now {
            return later;
        }
    }
    let tomorrow = today.succ_opt().unwrap_or(today);
    resolve_local(&tz, tomorrow.and_time(at))
}

// Ambiguous times take the earlier instant; times inside a DST gap move
// forward to the first minute that exists.
fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    if let Some(resolved) = tz.from_local_datetime(&naive).earliest() {
        return resolved;
    }
    let mut probe = naive;
    for _ in 0..(24 * 60) {
        probe += chrono::Duration::minutes(1);
        if let Some(resolved) = tz.from_local_datetime(&probe).earliest() {
            return resolved;
        }
    }
    tz.from_utc_datetime(&naive)
}

pub fn plan_reminder<Tz: TimeZone>(
    task_id: TaskId,
    at: NaiveTime,
    now: &DateTime<Tz>,
) -> ReminderRequest {
    let target = next_occurrence(now, at);
    let delay = target
        .clone()
        .signed_duration_since(now.clone())
        .to_std()
        .unwrap_or(Duration::ZERO);
    ReminderRequest {
        task_id,
        time_of_day: at,
        fire_at: target.with_timezone(&Utc),
        delay,
    }
}

pub fn reminder_options(task: &Task) -> NotificationOptions {
    NotificationOptions::with_body(format!("Don't forget: {}", task.text))
        .tag(task.id.to_string())
        .action(NotificationAction::new(VIEW_ACTION, "Open"))
        .data(json!({ "taskId": task.id.to_string() }))
}

/// Ties tasks to delayed notifications, one pending reminder per task.
#[derive(Clone)]
pub struct Reminders {
    gateway: NotificationGateway,
}

impl Reminders {
    pub fn new(gateway: NotificationGateway) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &NotificationGateway {
        &self.gateway
    }

    pub fn schedule(&self, task: &Task, at: NaiveTime) -> ReminderRequest {
        self.schedule_from(task, at, &Local::now())
    }

    pub fn schedule_from<Tz: TimeZone>(
        &self,
        task: &Task,
        at: NaiveTime,
        now: &DateTime<Tz>,
    ) -> ReminderRequest {
        let request = plan_reminder(task.id, at, now);
        self.gateway
            .schedule_notification(REMINDER_TITLE, reminder_options(task), request.delay);
        info!(
            task = %task.id,
            at = %at.format("%H:%M"),
            delay_secs = request.delay.as_secs(),
            "reminder scheduled"
        );
        request
    }

    pub fn withdraw(&self, id: TaskId) -> bool {
        self.gateway.cancel_tag(&id.to_string()) > 0
    }

    pub fn pending(&self) -> Vec<ScheduledNotification> {
        self.gateway
            .pending()
            .into_iter()
            .filter(|entry| task_tag(entry).is_some())
            .collect()
    }

    pub fn is_pending(&self, id: TaskId) -> bool {
        self.pending().iter().any(|entry| task_tag(entry) == Some(id))
    }

    /// Withdraw reminders whose task leaves the store.
    pub fn track(&self, store: &Arc<TaskStore>) -> SubscriptionId {
        let gateway = self.gateway.clone();
        let store_ref = Arc::downgrade(store);
        store.subscribe(move |event| match event {
            StoreEvent::Deleted(task) => {
                let withdrawn = gateway.cancel_tag(&task.id.to_string());
                if withdrawn > 0 {
                    debug!(task = %task.id, "reminder withdrawn with its task");
                }
            }
            StoreEvent::Reloaded => {
                let Some(store) = store_ref.upgrade() else {
                    return;
                };
                for entry in gateway.pending() {
                    if let Some(id) = task_tag(&entry) {
                        if store.get(id).is_none() {
                            gateway.cancel(entry.id);
                            debug!(task = %id, "reminder withdrawn after reload");
                        }
                    }
                }
            }
            _ => {}
        })
    }
}

fn task_tag(entry: &ScheduledNotification) -> Option<TaskId> {
    entry.tag.as_deref().and_then(|tag| tag.parse().ok())
}
