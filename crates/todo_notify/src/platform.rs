use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::options::NotificationOptions;
use crate::permission::Permission;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("notifications are not supported on this platform")]
    Unsupported,
    #[error("background worker registration failed: {0}")]
    Registration(String),
    #[error("background worker is no longer running")]
    WorkerGone,
    #[error("notification could not be shown: {0}")]
    Display(String),
}

/// Host-side notification capabilities.
///
/// Permission state is owned by the platform; callers should re-read it
/// rather than caching an answer for the lifetime of the process.
#[async_trait]
pub trait NotificationPlatform: Send + Sync {
    fn supports_notifications(&self) -> bool;

    fn permission(&self) -> Permission;

    /// Ask the user. Suspends until they answer.
    async fn request_permission(&self) -> Permission;

    /// Same-process delivery used when no worker is registered.
    fn show_direct(&self, title: &str, options: &NotificationOptions) -> Result<(), PlatformError>;

    async fn register_worker(
        &self,
        script: &str,
    ) -> Result<Arc<dyn WorkerRegistration>, PlatformError>;
}

/// Handle to an installed background delivery worker.
pub trait WorkerRegistration: Send + Sync {
    fn scope(&self) -> &str;

    fn show_notification(
        &self,
        title: &str,
        options: &NotificationOptions,
    ) -> Result<(), PlatformError>;
}
