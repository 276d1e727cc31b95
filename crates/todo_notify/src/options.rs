use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const DEFAULT_PUSH_TITLE: &str = "New Notification";
pub const DEFAULT_PUSH_BODY: &str = "You have a new message";

/// A named, user-clickable response offered on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

impl NotificationAction {
    pub fn new(action: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            title: title.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationOptions {
    #[serde(default)]
    pub body: String,
    /// Correlation tag; a newer notification with the same tag replaces the older one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<NotificationAction>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl NotificationOptions {
    pub fn with_body(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn action(mut self, action: NotificationAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Delivery request understood by the background worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    #[serde(default = "default_title", deserialize_with = "title_or_default")]
    pub title: String,
    #[serde(default = "default_body", deserialize_with = "body_or_default")]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub actions: Vec<NotificationAction>,
    #[serde(default)]
    pub data: Value,
}

fn default_title() -> String {
    DEFAULT_PUSH_TITLE.to_string()
}

fn default_body() -> String {
    DEFAULT_PUSH_BODY.to_string()
}

// Senders may spell an absent field as `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn title_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_title))
}

fn body_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_body))
}

impl Default for PushPayload {
    fn default() -> Self {
        Self {
            title: default_title(),
            body: default_body(),
            tag: None,
            icon: None,
            badge: None,
            actions: Vec::new(),
            data: Value::Null,
        }
    }
}

impl PushPayload {
    pub fn from_options(title: &str, options: &NotificationOptions) -> Self {
        Self {
            title: title.to_string(),
            body: options.body.clone(),
            tag: options.tag.clone(),
            icon: options.icon.clone(),
            badge: options.badge.clone(),
            actions: options.actions.clone(),
            data: options.data.clone(),
        }
    }

    /// Decode raw push data. Absent or malformed data yields the generic default.
    pub fn parse(raw: Option<&[u8]>) -> Self {
        let Some(bytes) = raw else {
            return Self::default();
        };
        match serde_json::from_slice::<PushPayload>(bytes) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::debug!(%err, "malformed push payload, using defaults");
                Self::default()
            }
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_missing_data_uses_defaults() {
        let payload = PushPayload::parse(None);
        assert_eq!(payload.title, DEFAULT_PUSH_TITLE);
        assert_eq!(payload.body, DEFAULT_PUSH_BODY);
        assert!(payload.actions.is_empty());
    }

    #[test]
    fn parse_garbage_uses_defaults() {
        let payload = PushPayload::parse(Some(b"\xff not json"));
        assert_eq!(payload, PushPayload::default());
    }

    #[test]
    fn parse_fills_missing_fields() {
        let raw = json!({ "title": "Standup", "actions": [{ "action": "view", "title": "Open" }] });
        let bytes = serde_json::to_vec(&raw).unwrap();
        let payload = PushPayload::parse(Some(&bytes));
        assert_eq!(payload.title, "Standup");
        assert_eq!(payload.body, DEFAULT_PUSH_BODY);
        assert_eq!(payload.actions, vec![NotificationAction::new("view", "Open")]);
        assert!(payload.data.is_null());
    }

    #[test]
    fn parse_treats_null_fields_as_absent() {
        let payload = PushPayload::parse(Some(
            br#"{"title":"Standup","body":"in 5","actions":null,"data":null,"tag":null}"#,
        ));
        assert_eq!(payload.title, "Standup");
        assert_eq!(payload.body, "in 5");
        assert!(payload.actions.is_empty());
        assert!(payload.data.is_null());
        assert_eq!(payload.tag, None);

        let payload = PushPayload::parse(Some(br#"{"title":null,"body":null}"#));
        assert_eq!(payload.title, DEFAULT_PUSH_TITLE);
        assert_eq!(payload.body, DEFAULT_PUSH_BODY);
    }

    #[test]
    fn options_carry_into_payload() {
        let options = NotificationOptions::with_body("Don't forget: milk")
            .tag("task-1")
            .action(NotificationAction::new("view", "Open"))
            .data(json!({ "taskId": "task-1" }));
        let payload = PushPayload::from_options("Todo Reminder", &options);
        let bytes = payload.to_bytes().unwrap();
        assert_eq!(PushPayload::parse(Some(&bytes)), payload);
        assert_eq!(payload.tag.as_deref(), Some("task-1"));
    }
}
