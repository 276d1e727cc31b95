use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::options::{NotificationAction, NotificationOptions, PushPayload};
use crate::platform::{PlatformError, WorkerRegistration};

/// Action name that brings the application window forward.
pub const VIEW_ACTION: &str = "view";

/// A notification as rendered by the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayedNotification {
    pub title: String,
    pub body: String,
    pub tag: Option<String>,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub actions: Vec<NotificationAction>,
    pub data: Value,
}

/// An open application window the worker can see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClient {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Install,
    Activate,
    Push {
        data: Option<Vec<u8>>,
    },
    NotificationClick {
        notification: DisplayedNotification,
        action: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    Installed,
    Activated { claimed: usize },
    Displayed(DisplayedNotification),
    /// Rendering failed on the host; the event was still consumed.
    Undelivered(DisplayedNotification),
    Focused(WindowClient),
    Opened(String),
    Closed,
}

/// Facilities the hosting platform offers a running worker.
pub trait WorkerHost: Send + Sync {
    /// Activate without waiting for existing pages to close.
    fn skip_waiting(&self);

    /// Take control of every open page; returns how many were claimed.
    fn claim_clients(&self) -> usize;

    fn show_notification(&self, notification: &DisplayedNotification) -> Result<(), PlatformError>;

    fn close_notification(&self, notification: &DisplayedNotification);

    fn window_clients(&self) -> Vec<WindowClient>;

    fn focus(&self, client: &WindowClient) -> Result<(), PlatformError>;

    fn open_window(&self, url: &str) -> Result<(), PlatformError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub app_url: String,
    pub icon: Option<String>,
    pub badge: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            app_url: "/".to_string(),
            icon: None,
            badge: None,
        }
    }
}

pub struct DeliveryWorker {
    host: Arc<dyn WorkerHost>,
    config: WorkerConfig,
}

impl DeliveryWorker {
    pub fn new(host: Arc<dyn WorkerHost>, config: WorkerConfig) -> Self {
        Self { host, config }
    }

    pub fn handle(&self, event: WorkerEvent) -> WorkerOutcome {
        match event {
            WorkerEvent::Install => {
                self.host.skip_waiting();
                debug!("worker installed, skipping wait");
                WorkerOutcome::Installed
            }
            WorkerEvent::Activate => {
                let claimed = self.host.claim_clients();
                info!(claimed, "worker activated");
                WorkerOutcome::Activated { claimed }
            }
            WorkerEvent::Push { data } => self.on_push(data.as_deref()),
            WorkerEvent::NotificationClick {
                notification,
                action,
            } => self.on_click(&notification, action.as_deref()),
        }
    }

    /// Run the worker on its own task, fed through a channel.
    pub fn spawn(self) -> WorkerHandle {
        let (sender, mut receiver) = mpsc::unbounded_channel::<WorkerEvent>();
        let task = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let outcome = self.handle(event);
                debug!(?outcome, "worker event handled");
            }
            debug!("worker channel closed");
        });
        WorkerHandle { sender, task }
    }

    fn on_push(&self, data: Option<&[u8]>) -> WorkerOutcome {
        let payload = PushPayload::parse(data);
        let notification = DisplayedNotification {
            title: payload.title,
            body: payload.body,
            tag: payload.tag,
            icon: payload.icon.or_else(|| self.config.icon.clone()),
            badge: payload.badge.or_else(|| self.config.badge.clone()),
            actions: payload.actions,
            data: payload.data,
        };
        match self.host.show_notification(&notification) {
            Ok(()) => WorkerOutcome::Displayed(notification),
            Err(err) => {
                warn!(%err, title = %notification.title, "worker could not render notification");
                WorkerOutcome::Undelivered(notification)
            }
        }
    }

    fn on_click(&self, notification: &DisplayedNotification, action: Option<&str>) -> WorkerOutcome {
        self.host.close_notification(notification);
        if action != Some(VIEW_ACTION) {
            return WorkerOutcome::Closed;
        }

        let app_url = self.config.app_url.as_str();
        if let Some(client) = self
            .host
            .window_clients()
            .into_iter()
            .find(|client| same_location(&client.url, app_url))
        {
            match self.host.focus(&client) {
                Ok(()) => return WorkerOutcome::Focused(client),
                Err(err) => warn!(%err, client = %client.id, "unable to focus window"),
            }
        }
        match self.host.open_window(app_url) {
            Ok(()) => WorkerOutcome::Opened(app_url.to_string()),
            Err(err) => {
                warn!(%err, url = app_url, "unable to open application window");
                WorkerOutcome::Closed
            }
        }
    }
}

fn same_location(candidate: &str, app_url: &str) -> bool {
    let trim = |url: &str| url.trim_end_matches('/').to_string();
    trim(candidate) == trim(app_url)
}

/// Channel into a spawned worker.
pub struct WorkerHandle {
    sender: mpsc::UnboundedSender<WorkerEvent>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn post(&self, event: WorkerEvent) -> Result<(), PlatformError> {
        self.sender
            .send(event)
            .map_err(|_| PlatformError::WorkerGone)
    }

    /// Install and activate the worker, returning a registration the gateway can deliver through.
    pub fn register(&self, scope: impl Into<String>) -> Result<Arc<ChannelRegistration>, PlatformError> {
        self.post(WorkerEvent::Install)?;
        self.post(WorkerEvent::Activate)?;
        Ok(Arc::new(ChannelRegistration {
            scope: scope.into(),
            sender: self.sender.clone(),
        }))
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

/// Delivers through a running worker by posting push data to it.
pub struct ChannelRegistration {
    scope: String,
    sender: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerRegistration for ChannelRegistration {
    fn scope(&self) -> &str {
        &self.scope
    }

    fn show_notification(
        &self,
        title: &str,
        options: &NotificationOptions,
    ) -> Result<(), PlatformError> {
        let data = PushPayload::from_options(title, options)
            .to_bytes()
            .map_err(|err| PlatformError::Display(err.to_string()))?;
        self.sender
            .send(WorkerEvent::Push { data: Some(data) })
            .map_err(|_| PlatformError::WorkerGone)
    }
}
