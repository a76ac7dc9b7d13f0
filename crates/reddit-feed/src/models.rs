use chrono::{DateTime, Utc};
use listing_core::{FeedError, Submission, SubmissionType};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

static RE_TRANSACTIONS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+").expect("valid regex"));

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawPost {
    id: String,
    title: String,
    #[serde(default)]
    selftext: Option<String>,
    #[serde(default)]
    author_flair_text: Option<String>,
    created_utc: f64,
    permalink: String,
}

/// Leading integer of a flair such as `"27 Transactions"`.
pub fn parse_transaction_count(flair: Option<&str>) -> Option<u32> {
    let flair = flair?.trim_start();
    RE_TRANSACTIONS
        .find(flair)
        .and_then(|m| m.as_str().parse::<u32>().ok())
}

/// Decode a `/new` listing body. Children are returned newest first, as Reddit sends them.
///
/// The outer `Err` means the whole body was unusable. Individual children that fail to
/// decode come back as `FeedError::Malformed`.
pub(crate) fn parse_listing(
    body: &str,
    site_url: &str,
) -> Result<Vec<Result<Submission, FeedError>>, FeedError> {
    let listing: Listing = serde_json::from_str(body)
        .map_err(|e| FeedError::Transient(format!("Undecodable listing: {}", e)))?;

    Ok(listing
        .data
        .children
        .into_iter()
        .map(|child| parse_child(child, site_url))
        .collect())
}

fn parse_child(child: serde_json::Value, site_url: &str) -> Result<Submission, FeedError> {
    let id = child
        .get("data")
        .and_then(|d| d.get("id"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    if child.get("kind").and_then(|k| k.as_str()) != Some("t3") {
        return Err(FeedError::Malformed {
            id,
            reason: "not a link submission".to_string(),
        });
    }

    let data = child.get("data").cloned().unwrap_or(serde_json::Value::Null);
    let raw: RawPost = serde_json::from_value(data).map_err(|e| FeedError::Malformed {
        id: id.clone(),
        reason: e.to_string(),
    })?;

    if raw.id.is_empty() {
        return Err(FeedError::Malformed {
            id: None,
            reason: "empty id".to_string(),
        });
    }

    let created_at = DateTime::<Utc>::from_timestamp(raw.created_utc as i64, 0).ok_or_else(|| {
        FeedError::Malformed {
            id: Some(raw.id.clone()),
            reason: format!("created_utc out of range: {}", raw.created_utc),
        }
    })?;

    let permalink = if raw.permalink.starts_with("http") {
        raw.permalink
    } else {
        format!("{}{}", site_url.trim_end_matches('/'), raw.permalink)
    };

    Ok(Submission {
        submission_type: SubmissionType::from_title(&raw.title),
        author_transaction_count: parse_transaction_count(raw.author_flair_text.as_deref()),
        id: raw.id,
        title: raw.title,
        body: raw.selftext.unwrap_or_default(),
        created_at,
        permalink,
    })
}
