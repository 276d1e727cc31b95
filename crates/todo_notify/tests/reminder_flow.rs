use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use parking_lot::Mutex;
use tempfile::tempdir;
use tokio::sync::mpsc;

use todo_core::{FileStorage, TaskStore};
use todo_notify::worker::{DisplayedNotification, WindowClient, WorkerOutcome};
use todo_notify::{
    DeliveryWorker, NotificationGateway, NotificationOptions, NotificationPlatform, Permission,
    PlatformError, Reminders, WorkerConfig, WorkerEvent, WorkerHandle, WorkerHost,
    WorkerRegistration,
};

struct ChannelHost {
    rendered: mpsc::UnboundedSender<DisplayedNotification>,
}

impl WorkerHost for ChannelHost {
    fn skip_waiting(&self) {}

    fn claim_clients(&self) -> usize {
        1
    }

    fn show_notification(&self, notification: &DisplayedNotification) -> Result<(), PlatformError> {
        self.rendered
            .send(notification.clone())
            .map_err(|_| PlatformError::Display("test receiver dropped".into()))
    }

    fn close_notification(&self, _notification: &DisplayedNotification) {}

    fn window_clients(&self) -> Vec<WindowClient> {
        Vec::new()
    }

    fn focus(&self, _client: &WindowClient) -> Result<(), PlatformError> {
        Ok(())
    }

    fn open_window(&self, _url: &str) -> Result<(), PlatformError> {
        Ok(())
    }
}

struct WorkerPlatform {
    worker: WorkerHandle,
    permission: Mutex<Permission>,
}

#[async_trait]
impl NotificationPlatform for WorkerPlatform {
    fn supports_notifications(&self) -> bool {
        true
    }

    fn permission(&self) -> Permission {
        *self.permission.lock()
    }

    async fn request_permission(&self) -> Permission {
        *self.permission.lock() = Permission::Granted;
        Permission::Granted
    }

    fn show_direct(&self, _title: &str, _options: &NotificationOptions) -> Result<(), PlatformError> {
        Err(PlatformError::Display("direct path not expected".into()))
    }

    async fn register_worker(
        &self,
        _script: &str,
    ) -> Result<Arc<dyn WorkerRegistration>, PlatformError> {
        let registration: Arc<dyn WorkerRegistration> = self.worker.register("/")?;
        Ok(registration)
    }
}

fn fixture() -> (
    tempfile::TempDir,
    Arc<TaskStore>,
    Reminders,
    mpsc::UnboundedReceiver<DisplayedNotification>,
) {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(
        TaskStore::builder()
            .with_storage(Arc::new(FileStorage::new(temp.path())))
            .build(),
    );
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = DeliveryWorker::new(Arc::new(ChannelHost { rendered: tx }), WorkerConfig::default()).spawn();
    let platform = Arc::new(WorkerPlatform {
        worker,
        permission: Mutex::new(Permission::Default),
    });
    let reminders = Reminders::new(NotificationGateway::new(platform));
    (temp, store, reminders, rx)
}

fn two_pm() -> chrono::DateTime<Utc> {
    Utc.from_utc_datetime(
        &NaiveDate::from_ymd_opt(2025, 6, 2)
            .expect("date")
            .and_hms_opt(14, 0, 0)
            .expect("time"),
    )
}

#[tokio::test(start_paused = true)]
async fn reminder_is_rendered_by_the_worker_when_due() {
    let (_temp, store, reminders, mut rendered) = fixture();
    let permission = reminders
        .gateway()
        .request_permission()
        .await
        .expect("supported");
    assert_eq!(permission, Permission::Granted);

    let id = store.add_task("Buy milk").expect("task created");
    let task = store.get(id).expect("task present");
    let request = reminders.schedule_from(
        &task,
        NaiveTime::from_hms_opt(15, 0, 0).expect("time"),
        &two_pm(),
    );
    assert_eq!(request.delay, Duration::from_secs(3600));
    assert!(reminders.is_pending(id));

    tokio::time::advance(Duration::from_secs(1800)).await;
    tokio::task::yield_now().await;
    assert!(rendered.try_recv().is_err());

    let shown = rendered.recv().await.expect("reminder rendered");
    assert_eq!(shown.title, "Todo Reminder");
    assert_eq!(shown.body, "Don't forget: Buy milk");
    assert_eq!(shown.tag, Some(id.to_string()));
    assert!(!reminders.is_pending(id));
}

#[tokio::test(start_paused = true)]
async fn deleting_a_task_withdraws_its_reminder() {
    let (_temp, store, reminders, mut rendered) = fixture();
    reminders
        .gateway()
        .request_permission()
        .await
        .expect("supported");
    reminders.track(&store);

    let keep = store.add_task("Water plants").expect("task created");
    let remove = store.add_task("Call plumber").expect("task created");
    let at = NaiveTime::from_hms_opt(13, 0, 0).expect("time");
    for id in [keep, remove] {
        let task = store.get(id).expect("task present");
        let request = reminders.schedule_from(&task, at, &two_pm());
        assert!(request.delay >= Duration::from_secs(23 * 3600));
    }
    assert_eq!(reminders.pending().len(), 2);

    assert!(store.delete_task(remove));
    assert!(!reminders.is_pending(remove));
    assert!(reminders.is_pending(keep));

    let shown = rendered.recv().await.expect("remaining reminder rendered");
    assert_eq!(shown.body, "Don't forget: Water plants");
    tokio::task::yield_now().await;
    assert!(rendered.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn reminder_is_withdrawn_when_another_writer_removes_the_task() {
    let (temp, store, reminders, _rendered) = fixture();
    reminders.track(&store);

    let gone = store.add_task("Book dentist").expect("task created");
    let kept = store.add_task("Renew passport").expect("task created");
    let at = NaiveTime::from_hms_opt(15, 0, 0).expect("time");
    for id in [gone, kept] {
        let task = store.get(id).expect("task present");
        reminders.schedule_from(&task, at, &two_pm());
    }

    let other = TaskStore::builder()
        .with_storage(Arc::new(FileStorage::new(temp.path())))
        .build();
    assert!(other.delete_task(gone));

    assert!(store.reload());
    assert!(store.get(gone).is_none());
    assert!(!reminders.is_pending(gone));
    assert!(reminders.is_pending(kept));
}

#[tokio::test]
async fn worker_click_protocol_is_reachable_through_the_handle() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker = DeliveryWorker::new(Arc::new(ChannelHost { rendered: tx }), WorkerConfig::default());

    let outcome = worker.handle(WorkerEvent::Push {
        data: Some(br#"{"title":"Hi"}"#.to_vec()),
    });
    let notification = match outcome {
        WorkerOutcome::Displayed(shown) => shown,
        other => panic!("expected display, got {other:?}"),
    };
    assert_eq!(rx.recv().await.expect("rendered").title, "Hi");

    let outcome = worker.handle(WorkerEvent::NotificationClick {
        notification,
        action: Some("view".into()),
    });
    assert_eq!(outcome, WorkerOutcome::Opened("/".into()));
}
