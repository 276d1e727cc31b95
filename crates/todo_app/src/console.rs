use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncBufRead, Lines};
use tracing::{debug, info};

use todo_notify::worker::{DisplayedNotification, WindowClient};
use todo_notify::{
    NotificationOptions, NotificationPlatform, Permission, PlatformError, WorkerHandle, WorkerHost,
    WorkerRegistration,
};

use crate::config::NotificationMode;

/// Terminal input shared between the shell loop and the permission prompt.
pub type SharedInput<R> = Arc<tokio::sync::Mutex<Lines<R>>>;

/// Notification platform backed by the terminal.
pub struct ConsolePlatform<R> {
    supported: bool,
    permission: RwLock<Permission>,
    input: SharedInput<R>,
    worker: Option<Arc<WorkerHandle>>,
    scope: String,
}

impl<R> ConsolePlatform<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(
        mode: NotificationMode,
        input: SharedInput<R>,
        worker: Option<Arc<WorkerHandle>>,
        scope: impl Into<String>,
    ) -> Self {
        let (supported, permission) = match mode {
            NotificationMode::Prompt => (true, Permission::Default),
            NotificationMode::Granted => (true, Permission::Granted),
            NotificationMode::Denied => (true, Permission::Denied),
            NotificationMode::Unsupported => (false, Permission::Default),
        };
        Self {
            supported,
            permission: RwLock::new(permission),
            input,
            worker,
            scope: scope.into(),
        }
    }

    async fn prompt(&self) -> Permission {
        print!("Allow notifications from Taskmaster? [y/N] ");
        let _ = std::io::stdout().flush();
        let answer = {
            let mut lines = self.input.lock().await;
            lines.next_line().await
        };
        match answer {
            Ok(Some(line)) if matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes") => {
                Permission::Granted
            }
            Ok(_) => Permission::Denied,
            Err(err) => {
                debug!(%err, "permission prompt unreadable, treating as denied");
                Permission::Denied
            }
        }
    }
}

#[async_trait]
impl<R> NotificationPlatform for ConsolePlatform<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    fn supports_notifications(&self) -> bool {
        self.supported
    }

    fn permission(&self) -> Permission {
        *self.permission.read()
    }

    async fn request_permission(&self) -> Permission {
        let current = self.permission();
        if current != Permission::Default {
            return current;
        }
        let answer = self.prompt().await;
        *self.permission.write() = answer;
        answer
    }

    fn show_direct(&self, title: &str, options: &NotificationOptions) -> Result<(), PlatformError> {
        println!("\n[notification] {title}: {}", options.body);
        Ok(())
    }

    async fn register_worker(
        &self,
        script: &str,
    ) -> Result<Arc<dyn WorkerRegistration>, PlatformError> {
        let Some(worker) = &self.worker else {
            return Err(PlatformError::Registration(format!(
                "no worker available for {script}"
            )));
        };
        let registration: Arc<dyn WorkerRegistration> = worker.register(self.scope.clone())?;
        Ok(registration)
    }
}

/// Worker host rendering into the terminal. The terminal is the single app window.
pub struct ConsoleWorkerHost {
    app_url: String,
    shown: Mutex<Vec<DisplayedNotification>>,
}

impl ConsoleWorkerHost {
    pub fn new(app_url: impl Into<String>) -> Self {
        Self {
            app_url: app_url.into(),
            shown: Mutex::new(Vec::new()),
        }
    }

    /// Notifications still on screen, oldest first.
    pub fn visible(&self) -> Vec<DisplayedNotification> {
        self.shown.lock().clone()
    }

    pub fn find(&self, key: &str) -> Option<DisplayedNotification> {
        let shown = self.shown.lock();
        if let Ok(position) = key.parse::<usize>() {
            if let Some(found) = position.checked_sub(1).and_then(|i| shown.get(i)) {
                return Some(found.clone());
            }
        }
        shown
            .iter()
            .find(|notification| notification.tag.as_deref() == Some(key))
            .cloned()
    }
}

impl WorkerHost for ConsoleWorkerHost {
    fn skip_waiting(&self) {
        debug!("console worker active");
    }

    fn claim_clients(&self) -> usize {
        1
    }

    fn show_notification(&self, notification: &DisplayedNotification) -> Result<(), PlatformError> {
        let mut shown = self.shown.lock();
        if let Some(tag) = &notification.tag {
            shown.retain(|existing| existing.tag.as_ref() != Some(tag));
        }
        shown.push(notification.clone());
        let actions: Vec<&str> = notification
            .actions
            .iter()
            .map(|action| action.title.as_str())
            .collect();
        if actions.is_empty() {
            println!("\n[reminder] {}: {}", notification.title, notification.body);
        } else {
            println!(
                "\n[reminder] {}: {} ({})",
                notification.title,
                notification.body,
                actions.join(" | ")
            );
        }
        Ok(())
    }

    fn close_notification(&self, notification: &DisplayedNotification) {
        self.shown.lock().retain(|existing| existing != notification);
    }

    fn window_clients(&self) -> Vec<WindowClient> {
        vec![WindowClient {
            id: "console".to_string(),
            url: self.app_url.clone(),
        }]
    }

    fn focus(&self, client: &WindowClient) -> Result<(), PlatformError> {
        info!(client = %client.id, "focusing application window");
        println!("(back to your tasks)");
        Ok(())
    }

    fn open_window(&self, url: &str) -> Result<(), PlatformError> {
        info!(url, "opening application window");
        Ok(())
    }
}
