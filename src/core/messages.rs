//! Structured messages for the glasses firmware
//! A write that parses as JSON with a `type` field is dispatched by the
//! firmware to the matching screen; anything else is shown as plain text.

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::NOTE_CONTENT_LIMIT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarSettings {
    pub meeting_reminders: bool,
    pub daily_agenda: bool,
    pub location_based_reminders: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSettings {
    pub location_based_messages: bool,
    pub time_based_messages: bool,
    pub activity_based_alerts: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplaySettings {
    /// Font size name, e.g. "small", "medium", "large"
    pub title_size: String,
    pub message_size: String,
    /// How long a message stays up, in milliseconds. Left unchanged when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_timeout: Option<u64>,
}

/// One JSON document understood by the firmware
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Envelope {
    Note { title: String, content: String },
    CalendarSettings { settings: CalendarSettings },
    ContextSettings { settings: ContextSettings },
    DisplaySettings { settings: DisplaySettings },
    CalendarEvent {
        title: String,
        time: String,
        minutes_until: i32,
        location: String,
    },
    LocationMessage { location: String, message: String },
    SetTime { hour: u8, minute: u8 },
    DailyAgenda { message: String },
    /// Shown for `duration` milliseconds
    TemporaryMessage {
        title: String,
        message: String,
        duration: u64,
    },
    UrgentAlert { title: String, message: String },
    ShowTime,
}

impl Envelope {
    /// A note, with the body cut to what the firmware's buffer accepts
    pub fn note(title: impl Into<String>, content: &str) -> Self {
        Envelope::Note {
            title: title.into(),
            content: content.chars().take(NOTE_CONTENT_LIMIT).collect(),
        }
    }

    /// The current local wall-clock time
    pub fn set_time_now() -> Self {
        use chrono::Timelike;
        let now = chrono::Local::now();
        Envelope::SetTime {
            hour: now.hour() as u8,
            minute: now.minute() as u8,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
