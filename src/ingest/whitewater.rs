/// American Whitewater reach description client
///
/// Downloads the JSON behind a reach page and pulls out the `info` block the
/// reach model is built from. Free-text fields on AW are user-entered HTML
/// with a lot of stray whitespace, so every text value passes through
/// [`clean_text`] before it is kept.

use crate::logging::{self, Service};
use crate::model::{ReachError, Result};
use crate::retry::{CancelToken, RetryPolicy};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

// ============================================================================
// URL + JSON helpers
// ============================================================================

pub fn build_reach_url(base: &str, reach_id: &str) -> String {
    format!("{}/{}/.json", base.trim_end_matches('/'), reach_id)
}

/// The `info` block of a reach detail document.
pub fn reach_info(raw: &Value) -> Result<&Value> {
    raw.pointer("/CContainerViewJSON_view/CRiverMainGadgetJSON_main/info")
        .filter(|v| v.is_object())
        .ok_or_else(|| ReachError::Parse("reach JSON has no CRiverMainGadgetJSON_main.info block".to_string()))
}

struct Patterns {
    break_tags: Regex,
    tags: Regex,
    spaces: Regex,
    newlines: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |pattern: &str| Regex::new(pattern).expect("markup pattern is valid");
        Patterns {
            break_tags: compile(r"(?i)<\s*(br\s*/?|/p|/div|/li)\s*>"),
            tags: compile(r"<[^<>]+>"),
            spaces: compile(r"[ \t]{2,}"),
            newlines: compile(r"\n{3,}"),
        }
    })
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Strips HTML and whitespace noise from an AW text field.
///
/// Returns `None` when nothing meaningful is left (empty, whitespace only, or `N/A`).
pub fn clean_text(input: &str) -> Option<String> {
    let patterns = patterns();

    let text = input.replace("\r\n", "\n").replace('\r', "\n");
    let text = patterns.break_tags.replace_all(&text, "\n");
    let text = patterns.tags.replace_all(&text, "");
    let text = decode_entities(&text);
    let text = patterns.spaces.replace_all(&text, " ");
    let text = patterns.newlines.replace_all(&text, "\n\n");
    let text = text.trim_end_matches('\n').replace('<', "[").replace('>', "]");
    let text = text.trim();

    if text.is_empty() || text == "N/A" {
        None
    } else {
        Some(text.to_string())
    }
}

/// A cleaned text value, or `None` if the key is absent, null or blank.
pub fn aw_text(info: &Value, key: &str) -> Option<String> {
    match info.get(key)? {
        Value::String(s) => clean_text(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A numeric value that AW may send as a number or a numeric string.
pub fn aw_number(info: &Value, key: &str) -> Option<f64> {
    match info.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct WhitewaterClient {
    client: reqwest::blocking::Client,
    base_url: String,
    policy: RetryPolicy,
    cancel: CancelToken,
}

impl WhitewaterClient {
    pub fn new(client: reqwest::blocking::Client, base_url: &str, policy: RetryPolicy, cancel: CancelToken) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            policy,
            cancel,
        }
    }

    /// Fetches the raw reach document. `Ok(None)` when AW answers with an
    /// empty body, which is how it reports a reach id that does not exist.
    pub fn fetch_reach_json(&self, reach_id: &str) -> Result<Option<Value>> {
        let url = build_reach_url(&self.base_url, reach_id);

        let result = self.policy.run(&self.cancel, |attempt| {
            let response = self.client.get(&url).header("Accept", "application/json").send()?;
            let status = response.status();
            if !status.is_success() {
                logging::debug(
                    Service::Whitewater,
                    Some(reach_id),
                    &format!("attempt {:02} failed with status {}", attempt, status),
                );
                return Err(ReachError::Parse(format!("HTTP {}", status)));
            }

            let body = response.text()?;
            if body.trim().is_empty() {
                return Ok(None);
            }
            Ok(Some(serde_json::from_str::<Value>(&body)?))
        });

        result.map_err(|e| match e {
            ReachError::Cancelled => ReachError::Cancelled,
            other => ReachError::NetworkUnavailable {
                service: "American Whitewater",
                attempts: self.policy.max_attempts.max(1),
                detail: format!("cannot download data for reach {}: {}", reach_id, other),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reach_url() {
        assert_eq!(
            build_reach_url("https://www.americanwhitewater.org/content/River/detail/id/", "3066"),
            "https://www.americanwhitewater.org/content/River/detail/id/3066/.json"
        );
    }

    #[test]
    fn test_clean_text_strips_markup_and_spacing() {
        let raw = "<p>Great   run&nbsp;with <b>big</b> rapids.</p>\n\n\n\n<p>Scout  Dragon's Tooth.</p>\n\n";
        assert_eq!(
            clean_text(raw).as_deref(),
            Some("Great run with big rapids.\n\nScout Dragon's Tooth.")
        );
    }

    #[test]
    fn test_clean_text_replaces_leftover_angle_brackets() {
        assert_eq!(clean_text("see &lt;http://example.org&gt;").as_deref(), Some("see [http://example.org]"));
    }

    #[test]
    fn test_blank_values_become_none() {
        assert_eq!(clean_text("   \r\n\t "), None);
        assert_eq!(clean_text(""), None);
        assert_eq!(clean_text("N/A"), None);
        assert_eq!(clean_text("<p> </p>"), None);
    }

    #[test]
    fn test_info_block_accessors() {
        let raw = json!({
            "CContainerViewJSON_view": {
                "CRiverMainGadgetJSON_main": {
                    "info": {"river": "White Salmon", "agency": null, "plat": "45.794848", "plon": -121.634402, "huc": 17070105}
                }
            }
        });
        let info = reach_info(&raw).unwrap();
        assert_eq!(aw_text(info, "river").as_deref(), Some("White Salmon"));
        assert_eq!(aw_text(info, "agency"), None);
        assert_eq!(aw_text(info, "missing"), None);
        assert_eq!(aw_text(info, "huc").as_deref(), Some("17070105"));
        assert_eq!(aw_number(info, "plat"), Some(45.794848));
        assert_eq!(aw_number(info, "plon"), Some(-121.634402));
    }

    #[test]
    fn test_missing_info_block_is_parse_error() {
        assert!(matches!(reach_info(&json!({"other": {}})), Err(ReachError::Parse(_))));
    }
}
