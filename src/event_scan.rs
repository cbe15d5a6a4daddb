//! Detection of structured events in clean terminal lines.
//!
//! The dispatch core routes structured events by opaque type strings; this
//! module is the producer side for the event types the application emits from
//! terminal output: plan files written by agents, structured rate-limit
//! errors, and prompts waiting for user input. The embedding application runs
//! `scan_line` over each logical line and forwards the results to
//! `dispatch_structured_event`.
//!
//! Rate-limit detection only matches structured error output (API error
//! codes, HTTP status shapes, error class names). Agents discuss rate limits
//! in conversational prose all the time; matching plain English here would
//! flood sessions with false positives.

use serde_json::{Value, json};

/// A plan file path appeared in output. Payload: `{ "path": String }`.
pub const EVENT_PLAN_FILE: &str = "plan-file";
/// A structured rate-limit error appeared. Payload:
/// `{ "patternName": String, "matchedText": String, "retryAfterMs": u64? }`.
pub const EVENT_RATE_LIMIT: &str = "rate-limit";
/// The agent appears to be waiting for input. Payload:
/// `{ "promptText": String }`.
pub const EVENT_QUESTION: &str = "question";

/// A structured event detected in one logical line.
#[derive(Debug, Clone)]
pub struct ScanEvent {
    pub event_type: &'static str,
    pub payload: Value,
}

/// Scan one clean (ANSI-stripped) logical line for structured events.
pub fn scan_line(line: &str) -> Vec<ScanEvent> {
    let mut events = Vec::new();
    if let Some(event) = detect_plan_file(line) {
        events.push(event);
    }
    if let Some(event) = detect_rate_limit(line) {
        events.push(event);
    }
    if let Some(event) = detect_question(line) {
        events.push(event);
    }
    events
}

/// Plan file paths like `plans/foo.md` or `.claude/plans/bar.md`.
/// Template placeholders (`plans/<file>.md`) are excluded.
fn detect_plan_file(line: &str) -> Option<ScanEvent> {
    // Fast path before the regex
    if !line.contains("plans/") || !line.contains(".md") {
        return None;
    }
    lazy_static::lazy_static! {
        static ref PLAN_RE: regex::Regex = regex::Regex::new(
            r#"(?:^|[\s'":])(/?(?:[^\s'"<>]+/)?plans/[^\s'"<>]+\.mdx?)"#
        )
        .unwrap();
    }
    PLAN_RE.captures(line).map(|caps| ScanEvent {
        event_type: EVENT_PLAN_FILE,
        payload: json!({ "path": &caps[1] }),
    })
}

struct RateLimitPattern {
    name: &'static str,
    regex: regex::Regex,
    retry_after_ms: Option<u64>,
    /// Group 1 captures a retry-after value in seconds.
    captures_retry: bool,
}

lazy_static::lazy_static! {
    static ref RATE_LIMIT_PATTERNS: Vec<RateLimitPattern> = vec![
        rl("anthropic-rate-limit", r"(?i)rate_limit_error", Some(60_000), false),
        rl("anthropic-overloaded", r"(?i)overloaded_error", Some(30_000), false),
        rl("openai-rate-limit", r"RateLimitError", Some(60_000), false),
        rl("gemini-resource-exhausted", r"RESOURCE_EXHAUSTED", Some(60_000), false),
        rl("http-429", r"(?i)\b429\b.{0,20}Too Many Requests|HTTP[/ ]\S*\s*429", Some(60_000), false),
        rl("retry-after-header", r"(?i)Retry-After:\s*(\d+)", None, true),
        rl("retry-after-seconds", r"Retry after (\d+) seconds?", None, true),
    ];
}

fn rl(
    name: &'static str,
    pattern: &str,
    retry_after_ms: Option<u64>,
    captures_retry: bool,
) -> RateLimitPattern {
    RateLimitPattern {
        name,
        regex: regex::Regex::new(pattern).unwrap(),
        retry_after_ms,
        captures_retry,
    }
}

fn detect_rate_limit(line: &str) -> Option<ScanEvent> {
    for pattern in RATE_LIMIT_PATTERNS.iter() {
        let Some(found) = pattern.regex.find(line) else {
            continue;
        };
        let retry_after_ms = if pattern.captures_retry {
            pattern
                .regex
                .captures(line)
                .and_then(|caps| caps.get(1))
                .and_then(|g| g.as_str().parse::<u64>().ok())
                .map(|secs| secs * 1000)
        } else {
            pattern.retry_after_ms
        };
        return Some(ScanEvent {
            event_type: EVENT_RATE_LIMIT,
            payload: json!({
                "patternName": pattern.name,
                "matchedText": found.as_str(),
                "retryAfterMs": retry_after_ms.unwrap_or(60_000),
            }),
        });
    }
    None
}

/// Prompts waiting for user input: explicit questions, numbered menus, Y/N
/// confirmations, inquirer-style `? ` prompts.
fn detect_question(line: &str) -> Option<ScanEvent> {
    lazy_static::lazy_static! {
        static ref QUESTION_RE: regex::Regex = regex::Regex::new(
            r"(?i)(Would you like to proceed|Do you want to\b[^?]*\?|Is this (plan|approach) okay)"
        )
        .unwrap();
        static ref MENU_RE: regex::Regex = regex::Regex::new(r"[❯\)]\s*1\.\s+\S").unwrap();
        static ref YN_RE: regex::Regex =
            regex::Regex::new(r"\[([Yy]/[Nn]|[Nn]/[Yy])\]|\(yes/no\)").unwrap();
        static ref INQUIRER_RE: regex::Regex = regex::Regex::new(r"^\?\s+.+\??\s*$").unwrap();
    }

    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let is_prompt = QUESTION_RE.is_match(trimmed)
        || MENU_RE.is_match(trimmed)
        || YN_RE.is_match(trimmed)
        || INQUIRER_RE.is_match(trimmed);
    is_prompt.then(|| ScanEvent {
        event_type: EVENT_QUESTION,
        payload: json!({ "promptText": trimmed }),
    })
}
