use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::options::NotificationOptions;
use crate::permission::Permission;
use crate::platform::{NotificationPlatform, WorkerRegistration};

pub const DEFAULT_WORKER_SCRIPT: &str = "/sw.js";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    #[error("this platform does not support notifications")]
    Unsupported,
}

/// Which path a notification took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Worker,
    Direct,
    /// Permission was not granted at send time.
    Suppressed(Permission),
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScheduleId(u64);

/// A pending delayed notification. Withdraw it with [`NotificationGateway::cancel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledNotification {
    pub id: ScheduleId,
    pub tag: Option<String>,
    pub delay: Duration,
}

struct PendingTimer {
    tag: Option<String>,
    delay: Duration,
    abort: AbortHandle,
}

struct GatewayInner {
    platform: Arc<dyn NotificationPlatform>,
    worker_script: String,
    permission: RwLock<Permission>,
    registration: OnceCell<Option<Arc<dyn WorkerRegistration>>>,
    pending: Mutex<HashMap<ScheduleId, PendingTimer>>,
    next_id: AtomicU64,
}

/// Permission negotiation plus immediate and delayed delivery.
///
/// Cheap to clone; clones share permission state, the worker registration
/// and the table of pending timers.
#[derive(Clone)]
pub struct NotificationGateway {
    inner: Arc<GatewayInner>,
}

pub struct NotificationGatewayBuilder {
    platform: Arc<dyn NotificationPlatform>,
    worker_script: String,
}

impl NotificationGatewayBuilder {
    pub fn worker_script(mut self, script: impl Into<String>) -> Self {
        self.worker_script = script.into();
        self
    }

    pub fn build(self) -> NotificationGateway {
        let permission = self.platform.permission();
        debug!(%permission, "notification gateway created");
        NotificationGateway {
            inner: Arc::new(GatewayInner {
                platform: self.platform,
                worker_script: self.worker_script,
                permission: RwLock::new(permission),
                registration: OnceCell::new(),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }
}

impl NotificationGateway {
    pub fn builder(platform: Arc<dyn NotificationPlatform>) -> NotificationGatewayBuilder {
        NotificationGatewayBuilder {
            platform,
            worker_script: DEFAULT_WORKER_SCRIPT.to_string(),
        }
    }

    pub fn new(platform: Arc<dyn NotificationPlatform>) -> Self {
        Self::builder(platform).build()
    }

    /// Current permission, re-read from the platform.
    pub fn permission(&self) -> Permission {
        let current = self.inner.platform.permission();
        let mut held = self.inner.permission.write();
        if *held != current {
            debug!(from = %*held, to = %current, "notification permission changed");
            *held = current;
        }
        current
    }

    pub async fn request_permission(&self) -> Result<Permission, NotificationError> {
        if !self.inner.platform.supports_notifications() {
            warn!("notification permission requested on a platform without notifications");
            return Err(NotificationError::Unsupported);
        }
        self.registration().await;
        let result = self.inner.platform.request_permission().await;
        *self.inner.permission.write() = result;
        info!(permission = %result, "notification permission resolved");
        Ok(result)
    }

    /// The background worker registration, attempted once on first use.
    pub async fn registration(&self) -> Option<Arc<dyn WorkerRegistration>> {
        let inner = &self.inner;
        inner
            .registration
            .get_or_init(|| async {
                if !inner.platform.supports_notifications() {
                    return None;
                }
                match inner.platform.register_worker(&inner.worker_script).await {
                    Ok(registration) => {
                        info!(
                            script = %inner.worker_script,
                            scope = registration.scope(),
                            "background worker registered"
                        );
                        Some(registration)
                    }
                    Err(err) => {
                        warn!(%err, script = %inner.worker_script, "background worker unavailable, using direct notifications");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    pub async fn send_notification(&self, title: &str, options: &NotificationOptions) -> Delivery {
        let permission = self.permission();
        if !permission.is_granted() {
            debug!(%permission, title, "notification suppressed");
            return Delivery::Suppressed(permission);
        }

        if let Some(registration) = self.registration().await {
            match registration.show_notification(title, options) {
                Ok(()) => {
                    debug!(title, "notification handed to background worker");
                    return Delivery::Worker;
                }
                Err(err) => {
                    warn!(%err, title, "worker delivery failed, falling back to direct notification");
                }
            }
        }

        match self.inner.platform.show_direct(title, options) {
            Ok(()) => {
                debug!(title, "notification shown directly");
                Delivery::Direct
            }
            Err(err) => {
                warn!(%err, title, "notification could not be delivered");
                Delivery::Failed
            }
        }
    }

    /// Arm a timer that sends the notification after `delay`.
    ///
    /// A pending timer carrying the same tag is superseded. Timers live in
    /// this process only; nothing fires if it exits first. Must be called
    /// from within a tokio runtime.
    pub fn schedule_notification(
        &self,
        title: impl Into<String>,
        options: NotificationOptions,
        delay: Duration,
    ) -> ScheduledNotification {
        let id = ScheduleId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let tag = options.tag.clone();
        let title = title.into();

        let mut pending = self.inner.pending.lock();
        if let Some(tag) = &tag {
            pending.retain(|existing, timer| {
                if timer.tag.as_ref() == Some(tag) {
                    debug!(?existing, tag = %tag, "superseding pending notification");
                    timer.abort.abort();
                    false
                } else {
                    true
                }
            });
        }

        let gateway = self.clone();
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            gateway.inner.pending.lock().remove(&id);
            let delivery = gateway.send_notification(&title, &options).await;
            debug!(?id, ?delivery, "scheduled notification fired");
        });
        pending.insert(
            id,
            PendingTimer {
                tag: tag.clone(),
                delay,
                abort: handle.abort_handle(),
            },
        );
        debug!(?id, ?tag, delay_ms = delay.as_millis() as u64, "notification scheduled");

        ScheduledNotification { id, tag, delay }
    }

    pub fn cancel(&self, id: ScheduleId) -> bool {
        match self.inner.pending.lock().remove(&id) {
            Some(timer) => {
                timer.abort.abort();
                debug!(?id, "scheduled notification cancelled");
                true
            }
            None => false,
        }
    }

    /// Withdraw every pending notification carrying `tag`.
    pub fn cancel_tag(&self, tag: &str) -> usize {
        let mut pending = self.inner.pending.lock();
        let before = pending.len();
        pending.retain(|_, timer| {
            if timer.tag.as_deref() == Some(tag) {
                timer.abort.abort();
                false
            } else {
                true
            }
        });
        let cancelled = before - pending.len();
        if cancelled > 0 {
            debug!(tag, cancelled, "scheduled notifications withdrawn");
        }
        cancelled
    }

    pub fn cancel_all(&self) -> usize {
        let mut pending = self.inner.pending.lock();
        let count = pending.len();
        for (_, timer) in pending.drain() {
            timer.abort.abort();
        }
        count
    }

    pub fn pending(&self) -> Vec<ScheduledNotification> {
        let mut entries: Vec<ScheduledNotification> = self
            .inner
            .pending
            .lock()
            .iter()
            .map(|(id, timer)| ScheduledNotification {
                id: *id,
                tag: timer.tag.clone(),
                delay: timer.delay,
            })
            .collect();
        entries.sort_by_key(|entry| entry.id);
        entries
    }
}
