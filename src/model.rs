use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Category of a notification as assigned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RentalRequest,
    RentalStatusChange,
    CalibrationReminder,
    MaintenanceReminder,
    InventorySchedule,
    VendorInfo,
    RentalDueReminder,
    #[serde(other)]
    GeneralInfo,
}

impl NotificationKind {
    pub fn default_title(self) -> &'static str {
        match self {
            Self::RentalRequest => "Rental Request",
            Self::RentalStatusChange => "Rental Status Update",
            Self::CalibrationReminder => "Calibration Reminder",
            Self::MaintenanceReminder => "Maintenance Reminder",
            Self::InventorySchedule => "Inventory Schedule",
            Self::VendorInfo => "Vendor Information",
            Self::GeneralInfo => "Notification",
            Self::RentalDueReminder => "Rental Due Reminder",
        }
    }
}

/// Back-reference to the recurring rule that produced a reminder. Owned by the
/// external reminder source; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderRef {
    pub due_date: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default)]
    pub title: Option<String>,
    pub message: String,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub reminder: Option<ReminderRef>,
}

impl Notification {
    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => title,
            _ => self.kind.default_title(),
        }
    }
}

/// The identity a session is opened for. The cache is keyed by both fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub role: Option<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Option<String>) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

/// Response of `fetchNotifications`. `unread_count` is informational only; the
/// engine always recounts from the merged list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    #[serde(default)]
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub unread_count: usize,
    #[serde(default)]
    pub server_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResponse {
    #[serde(default)]
    pub created: u32,
}

/// Transport Manager state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    PushActive,
    Polling,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::PushActive => "PushActive",
            Self::Polling => "Polling",
        }
    }
}

/// Tri-state attention signal driving the poll cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionLevel {
    Active,
    Inactive,
    Background,
}

/// Snapshot of everything the rest of the application may observe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
    pub loading: bool,
    pub error: Option<String>,
}

impl Default for NotificationView {
    fn default() -> Self {
        Self {
            notifications: Vec::new(),
            unread_count: 0,
            loading: false,
            error: None,
        }
    }
}

/// Inbound push-channel events.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    NewNotification(Notification),
    NotificationMarkedRead {
        #[serde(deserialize_with = "deserialize_id")]
        id: String,
    },
    NotificationsMarkedRead {
        #[serde(default, deserialize_with = "deserialize_ids")]
        ids: Option<Vec<String>>,
    },
    PushNotification {
        title: String,
        #[serde(default)]
        body: String,
        #[serde(default, rename = "notificationId")]
        notification_id: Option<String>,
    },
}

/// Outbound push-channel intents. Fire-and-forget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PushCommand {
    Authenticate {
        #[serde(rename = "principalId")]
        principal_id: String,
    },
    Activity { state: ActivityHint },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityHint {
    Active,
    Inactive,
}

impl From<AttentionLevel> for ActivityHint {
    fn from(level: AttentionLevel) -> Self {
        match level {
            AttentionLevel::Active => Self::Active,
            AttentionLevel::Inactive | AttentionLevel::Background => Self::Inactive,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Text(String),
    Number(i64),
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    WireId::deserialize(deserializer).map(WireId::into_string)
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            WireId::Text(value) => value,
            WireId::Number(value) => value.to_string(),
        }
    }
}

fn deserialize_ids<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let ids = Option::<Vec<WireId>>::deserialize(deserializer)?;
    Ok(ids.map(|ids| ids.into_iter().map(WireId::into_string).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_notification() {
        let json = r#"{
            "id": 42,
            "type": "rental_due_reminder",
            "message": "Drill #7 is due back tomorrow",
            "isRead": false,
            "createdAt": "2024-05-01T10:00:00Z",
            "reminder": { "dueDate": "2024-05-02", "type": "rental_due" }
        }"#;
        let notification: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(notification.id, "42");
        assert_eq!(notification.kind, NotificationKind::RentalDueReminder);
        assert_eq!(notification.display_title(), "Rental Due Reminder");
        let reminder = notification.reminder.unwrap();
        assert_eq!(reminder.due_date, "2024-05-02");
        assert_eq!(reminder.kind, "rental_due");
    }

    #[test]
    fn unknown_kind_falls_back_to_general_info() {
        let json = r#"{"id":"x","type":"brand_new_kind","message":"m","createdAt":"2024-05-01T10:00:00Z"}"#;
        let notification: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(notification.kind, NotificationKind::GeneralInfo);
        assert!(!notification.is_read);
    }

    #[test]
    fn explicit_title_wins_over_default() {
        let json = r#"{"id":"x","type":"vendor_info","title":"ACME moved","message":"m","createdAt":"2024-05-01T10:00:00Z"}"#;
        let notification: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(notification.display_title(), "ACME moved");
    }

    #[test]
    fn parses_push_events() {
        let read: PushEvent =
            serde_json::from_str(r#"{"event":"notification_marked_read","data":{"id":7}}"#)
                .unwrap();
        assert_eq!(read, PushEvent::NotificationMarkedRead { id: "7".into() });

        let all: PushEvent =
            serde_json::from_str(r#"{"event":"notifications_marked_read","data":{}}"#).unwrap();
        assert_eq!(all, PushEvent::NotificationsMarkedRead { ids: None });

        let mixed: PushEvent = serde_json::from_str(
            r#"{"event":"notifications_marked_read","data":{"ids":[7,"8"]}}"#,
        )
        .unwrap();
        assert_eq!(
            mixed,
            PushEvent::NotificationsMarkedRead {
                ids: Some(vec!["7".into(), "8".into()]),
            }
        );

        let explicit_null: PushEvent = serde_json::from_str(
            r#"{"event":"notifications_marked_read","data":{"ids":null}}"#,
        )
        .unwrap();
        assert_eq!(explicit_null, PushEvent::NotificationsMarkedRead { ids: None });

        let os: PushEvent = serde_json::from_str(
            r#"{"event":"push_notification","data":{"title":"Due","body":"Drill","notificationId":"n1"}}"#,
        )
        .unwrap();
        assert_eq!(
            os,
            PushEvent::PushNotification {
                title: "Due".into(),
                body: "Drill".into(),
                notification_id: Some("n1".into()),
            }
        );
    }

    #[test]
    fn serializes_push_commands() {
        let auth = serde_json::to_value(PushCommand::Authenticate {
            principal_id: "u1".into(),
        })
        .unwrap();
        assert_eq!(
            auth,
            serde_json::json!({"event":"authenticate","data":{"principalId":"u1"}})
        );

        let hint = serde_json::to_value(PushCommand::Activity {
            state: AttentionLevel::Background.into(),
        })
        .unwrap();
        assert_eq!(
            hint,
            serde_json::json!({"event":"activity","data":{"state":"inactive"}})
        );
    }
}
