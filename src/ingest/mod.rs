// src/ingest/mod.rs
pub mod fixture;
pub mod store;
pub mod types;
pub mod watermark;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use regex::Regex;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::error::ParseError;
use crate::ingest::types::{ContentRecord, RawRecord, SourceDescriptor};

pub const TITLE_MAX_CHARS: usize = 500;
pub const BODY_MAX_CHARS: usize = 8000;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_records_total", "Raw records returned by adapters.");
        describe_counter!(
            "ingest_stale_total",
            "Records skipped because they are older than the source watermark."
        );
        describe_counter!(
            "ingest_parse_errors_total",
            "Raw records dropped because they could not be converted."
        );
        describe_counter!(
            "ingest_duplicates_total",
            "Records already present in the store."
        );
        describe_counter!("gate_rejected_total", "Records rejected by the gate.");
        describe_counter!(
            "worker_task_failures_total",
            "Fetch tasks that failed after all retries."
        );
        describe_histogram!("worker_fetch_ms", "Fetch task duration in milliseconds.");
        describe_counter!(
            "storage_requeued_total",
            "Records requeued after a store write failed."
        );
        describe_counter!("cycle_runs_total", "Completed monitoring cycles.");
        describe_gauge!("cycle_last_run_ts", "Unix ts when the last cycle finished.");
        describe_gauge!("allocation_units", "Resource units allocated per topic.");
    });
}

/// Normalize text: decode entities, strip tags, straighten quotes, collapse whitespace.
pub fn normalize_text(s: &str, max_chars: usize) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[a-z][^>]*>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse runs of spaces/tabs but keep line structure (code blocks, lists)
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"[ \t\u{00A0}]+").expect("ws regex"));
    out = re_ws.replace_all(&out, " ").to_string();
    static RE_NL: OnceCell<Regex> = OnceCell::new();
    let re_nl = RE_NL.get_or_init(|| Regex::new(r"\s*\n\s*\n\s*").expect("nl regex"));
    out = re_nl.replace_all(&out, "\n\n").to_string();
    out = out.trim().to_string();

    // 5) Length cap
    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect();
    }

    out
}

/// Best-effort publish date parsing. `None` means "unknown", which the
/// watermark check treats as new.
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc2822) {
        return DateTime::from_timestamp(dt.unix_timestamp(), dt.nanosecond());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
    }
    // unix seconds
    if let Ok(secs) = s.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }
    None
}

/// Stable record id: hex SHA-256 prefix over source id and natural key.
pub fn record_id(source_id: &str, natural_key: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(natural_key.trim().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Convert one adapter record into a `ContentRecord` collected for `topic`.
pub fn into_record(
    raw: RawRecord,
    source: &SourceDescriptor,
    topic: &str,
    authority: f64,
    collected_at: DateTime<Utc>,
) -> Result<ContentRecord, ParseError> {
    let title = raw
        .title
        .as_deref()
        .map(|t| normalize_text(t, TITLE_MAX_CHARS))
        .unwrap_or_default();
    if title.is_empty() {
        return Err(ParseError::MissingField {
            source_id: source.id.clone(),
            field: "title",
        });
    }
    let body = raw
        .body
        .as_deref()
        .map(|b| normalize_text(b, BODY_MAX_CHARS))
        .unwrap_or_default();
    let url = raw.url.as_deref().map(str::trim).unwrap_or_default().to_string();

    let natural_key = raw
        .natural_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .or_else(|| Some(url.as_str()).filter(|u| !u.is_empty()))
        .unwrap_or(title.as_str())
        .to_string();
    if natural_key.is_empty() {
        return Err(ParseError::MissingKey {
            source_id: source.id.clone(),
        });
    }

    let published_at = raw.published_at.as_deref().and_then(|p| {
        let parsed = parse_published(p);
        if parsed.is_none() {
            tracing::debug!(target: "ingest", source = %source.id, raw = p, "unparsable publish date");
        }
        parsed
    });

    let mut topics = vec![topic.to_string()];
    for t in raw.topics {
        let t = t.trim().to_lowercase();
        if !t.is_empty() && !topics.contains(&t) {
            topics.push(t);
        }
    }

    Ok(ContentRecord {
        id: record_id(&source.id, &natural_key),
        source_id: source.id.clone(),
        source_type: source.source_type,
        source_authority: authority.clamp(0.0, 1.0),
        title,
        body,
        url,
        published_at,
        collected_at,
        topics,
        metadata: raw.metadata,
    })
}
