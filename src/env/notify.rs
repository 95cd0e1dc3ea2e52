//! `$notification.post` rendering

use std::time::Duration;

use serde_json::Value;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// Longest delay a notification waits, the same ceiling as script timers
pub const MAX_DELAY: Duration = Duration::from_millis(i32::MAX as u64);

/// A notification posted by a script
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub subtitle: String,
    pub body: String,
    pub attachment: Option<Value>,
    pub delay: Duration,
}

impl Notification {
    pub fn new(
        title: impl Into<String>,
        subtitle: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            subtitle: subtitle.into(),
            body: body.into(),
            attachment: None,
            delay: Duration::ZERO,
        }
    }

    pub fn with_attachment(mut self, attachment: Option<Value>) -> Self {
        self.attachment = attachment.filter(|v| !v.is_null());
        self
    }

    /// Delay before display; negative or non-finite seconds mean none,
    /// anything past [`MAX_DELAY`] is capped
    pub fn with_delay_secs(mut self, secs: f64) -> Self {
        self.delay = if secs.is_finite() && secs > 0.0 {
            Duration::try_from_secs_f64(secs).map_or(MAX_DELAY, |delay| delay.min(MAX_DELAY))
        } else {
            Duration::ZERO
        };
        self
    }

    /// Lines written to the log when the notification is displayed
    pub fn render(&self) -> Vec<String> {
        let mut lines = vec![
            "━━━━━━━━━━ Notification ━━━━━━━━━━".to_string(),
            format!("Title: {}", self.title),
            format!("Subtitle: {}", self.subtitle),
            format!("Body: {}", self.body),
        ];
        if let Some(attachment) = &self.attachment {
            lines.push(format!("Attachment: {}", attachment));
        }
        lines.push(RULE.to_string());
        lines
    }
}
