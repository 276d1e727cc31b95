pub mod gateway;
pub mod options;
pub mod permission;
pub mod platform;
pub mod reminder;
pub mod worker;

pub use crate::gateway::{
    Delivery, NotificationError, NotificationGateway, ScheduleId, ScheduledNotification,
};
pub use crate::options::{NotificationAction, NotificationOptions, PushPayload};
pub use crate::permission::Permission;
pub use crate::platform::{NotificationPlatform, PlatformError, WorkerRegistration};
pub use crate::reminder::{parse_time_of_day, ReminderRequest, Reminders};
pub use crate::worker::{DeliveryWorker, WorkerConfig, WorkerEvent, WorkerHandle, WorkerHost};
