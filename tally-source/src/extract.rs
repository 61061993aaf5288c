//! Friend-count extraction from channel pages.
//!
//! Pages show the count next to the label "친구" (friends), either as a plain
//! digit run ("친구 12,345") or scaled by "만" (ten-thousand, "친구 3.2만").
//! A miss is a normal outcome and yields `None`.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

const TEN_THOUSAND: i64 = 10_000;

static SCRIPT_OR_STYLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(?:script|style)\b[^>]*>.*?</(?:script|style)\s*>").expect("valid regex")
});
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

// The scaled alternative comes first so "3.2만" never reads as 3.
static LABELED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"친구\s*수?\s*[:：]?\s*(\d+(?:\.\d+)?\s*만|\d+)").expect("valid regex")
});

static SCALED_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)(?:\.(\d+))?\s*만").expect("valid regex"));
static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)").expect("valid regex"));

/// Visible text of an HTML page: scripts and styles dropped, tags replaced by
/// spaces, common entities decoded, whitespace collapsed.
pub fn page_text(html: &str) -> String {
    let without_code = SCRIPT_OR_STYLE.replace_all(html, " ");
    let without_tags = TAG.replace_all(&without_code, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&#44;", ",")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    WHITESPACE.replace_all(&decoded, " ").trim().to_string()
}

/// Find the friend count in raw page content.
pub fn extract_count(content: &str) -> Option<i64> {
    let text = page_text(content).replace(',', "");
    let caps = LABELED.captures(&text)?;
    parse_value(caps.get(1)?.as_str())
}

/// Parse a bare value such as "3.2만" or "12,345".
pub fn parse_value(text: &str) -> Option<i64> {
    let text = text.trim().replace(',', "");
    if let Some(caps) = SCALED_VALUE.captures(&text) {
        return value_from(&caps, true);
    }
    DIGITS
        .captures(&text)
        .and_then(|caps| value_from(&caps, false))
}

fn value_from(caps: &Captures<'_>, scaled: bool) -> Option<i64> {
    let whole = caps.get(1)?.as_str();
    if !scaled {
        return whole.parse().ok();
    }
    let frac = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    scale_ten_thousand(whole, frac)
}

/// `whole.frac × 10 000`, truncated, computed in integers so "0.29만" is 2900.
fn scale_ten_thousand(whole: &str, frac: &str) -> Option<i64> {
    let mut digits: String = frac.chars().take(4).collect();
    while digits.len() < 4 {
        digits.push('0');
    }
    let whole: i64 = whole.parse().ok()?;
    let frac: i64 = digits.parse().ok()?;
    whole.checked_mul(TEN_THOUSAND)?.checked_add(frac)
}
