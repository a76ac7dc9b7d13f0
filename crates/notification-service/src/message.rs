use chrono::{DateTime, Utc};
use listing_core::{Submission, SubmissionType};
use serde::{Deserialize, Serialize};

const WTS_COLOR: u32 = 0x00ff00;
const WTB_COLOR: u32 = 0x0099ff;
const EMBED_TITLE_LIMIT: usize = 256;

/// Notification for one matched submission. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub submission_id: String,
    pub title: String,
    pub link: String,
    pub submission_type: SubmissionType,
    pub transaction_count: Option<u32>,
    pub posted_at: DateTime<Utc>,
    /// Role or user mention, e.g. `<@&1234>`. Prepended to the message content.
    pub mention: Option<String>,
}

impl NotificationMessage {
    pub fn from_submission(submission: &Submission, mention: Option<&str>) -> Self {
        Self {
            submission_id: submission.id.clone(),
            title: submission.title.clone(),
            link: submission.permalink.clone(),
            submission_type: submission.submission_type,
            transaction_count: submission.author_transaction_count,
            posted_at: submission.created_at,
            mention: mention
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string),
        }
    }

    /// Plain-text content line: mention (if any) followed by the link.
    pub fn content(&self) -> String {
        match &self.mention {
            Some(mention) => format!("{} {}", mention, self.link),
            None => self.link.clone(),
        }
    }

    /// Discord webhook body.
    pub fn webhook_payload(&self) -> serde_json::Value {
        let color = match self.submission_type {
            SubmissionType::Wtb => WTB_COLOR,
            _ => WTS_COLOR,
        };
        let transactions = self
            .transaction_count
            .map(|c| c.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        serde_json::json!({
            "content": self.content(),
            "embeds": [{
                "title": truncate(&self.title, EMBED_TITLE_LIMIT),
                "url": self.link,
                "color": color,
                "timestamp": self.posted_at.to_rfc3339(),
                "fields": [
                    { "name": "Type", "value": self.submission_type.label(), "inline": true },
                    { "name": "Transactions", "value": transactions, "inline": true },
                ],
                "footer": { "text": self.submission_id },
            }]
        })
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> Submission {
        Submission {
            id: "12abcd".to_string(),
            submission_type: SubmissionType::Wts,
            author_transaction_count: Some(42),
            title: "[WTS] Rolex Submariner 16610".to_string(),
            body: "Full set".to_string(),
            created_at: Utc::now(),
            permalink: "https://www.reddit.com/r/Watchexchange/comments/12abcd/wts_rolex/".to_string(),
        }
    }

    #[test]
    fn test_content_with_mention() {
        let message = NotificationMessage::from_submission(&submission(), Some("<@&1234>"));
        assert_eq!(
            message.content(),
            "<@&1234> https://www.reddit.com/r/Watchexchange/comments/12abcd/wts_rolex/"
        );
    }

    #[test]
    fn test_blank_mention_is_dropped() {
        let message = NotificationMessage::from_submission(&submission(), Some("   "));
        assert!(message.mention.is_none());
        assert_eq!(message.content(), message.link);
    }

    #[test]
    fn test_webhook_payload_shape() {
        let message = NotificationMessage::from_submission(&submission(), None);
        let payload = message.webhook_payload();

        assert_eq!(payload["content"], message.link);
        let embed = &payload["embeds"][0];
        assert_eq!(embed["title"], "[WTS] Rolex Submariner 16610");
        assert_eq!(embed["url"], message.link);
        assert_eq!(embed["fields"][0]["value"], "WTS");
        assert_eq!(embed["fields"][1]["value"], "42");
        assert_eq!(embed["footer"]["text"], "12abcd");
    }

    #[test]
    fn test_long_titles_are_truncated() {
        let mut long = submission();
        long.title = "x".repeat(400);
        let payload = NotificationMessage::from_submission(&long, None).webhook_payload();
        let title = payload["embeds"][0]["title"].as_str().unwrap();
        assert_eq!(title.chars().count(), EMBED_TITLE_LIMIT);
    }
}
