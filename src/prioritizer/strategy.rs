//! Scoring strategies. Selected by configuration as a tagged variant:
//!
//! ```toml
//! [scoring.strategy]
//! kind = "source_aware"
//! views_saturation = 1000000.0
//! ```

use serde::{Deserialize, Serialize};

use crate::ingest::types::{ContentRecord, SourceType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoringStrategy {
    /// Uses only generic metadata keys and text length.
    Generic,
    /// Reads source-type metadata (views, stars, comments, rank) and body structure.
    SourceAware(SourceAwareParams),
}

impl Default for ScoringStrategy {
    fn default() -> Self {
        ScoringStrategy::SourceAware(SourceAwareParams::default())
    }
}

impl ScoringStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ScoringStrategy::Generic => "generic",
            ScoringStrategy::SourceAware(_) => "source_aware",
        }
    }
}

/// Counts at which a signal saturates to 1.0 on a log scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceAwareParams {
    pub views_saturation: f64,
    pub stars_saturation: f64,
    pub forks_saturation: f64,
    pub comments_saturation: f64,
    pub upvotes_saturation: f64,
    /// Search results ranked beyond this contribute nothing.
    pub search_depth: f64,
    pub ideal_video_minutes: (f64, f64),
}

impl Default for SourceAwareParams {
    fn default() -> Self {
        Self {
            views_saturation: 1_000_000.0,
            stars_saturation: 50_000.0,
            forks_saturation: 5_000.0,
            comments_saturation: 500.0,
            upvotes_saturation: 2_000.0,
            search_depth: 10.0,
            ideal_video_minutes: (5.0, 30.0),
        }
    }
}

pub(crate) fn log_scaled(x: f64, saturation: f64) -> f64 {
    if x <= 0.0 || saturation <= 0.0 {
        return 0.0;
    }
    ((1.0 + x).ln() / (1.0 + saturation).ln()).clamp(0.0, 1.0)
}

fn video_duration_score(minutes: f64, ideal: (f64, f64)) -> f64 {
    let (lo, hi) = ideal;
    if minutes <= 0.0 {
        0.0
    } else if minutes < lo {
        0.4 + 0.6 * (minutes / lo)
    } else if minutes <= hi {
        1.0
    } else {
        (hi / minutes).max(0.4)
    }
}

/// Engagement from source-type metadata, `None` when the record carries none.
pub(crate) fn type_engagement(record: &ContentRecord, p: &SourceAwareParams) -> Option<f64> {
    let m = |k: &str| record.metric(k);
    let score = match record.source_type {
        SourceType::Video => {
            let views = m("views")?;
            let reach = log_scaled(views, p.views_saturation);
            let like_rate = m("likes")
                .filter(|_| views > 0.0)
                .map(|l| (l / views * 20.0).min(1.0))
                .unwrap_or(0.0);
            let duration = m("duration_minutes")
                .or_else(|| m("duration_secs").map(|s| s / 60.0))
                .map(|d| video_duration_score(d, p.ideal_video_minutes))
                .unwrap_or(0.5);
            0.5 * reach + 0.3 * like_rate + 0.2 * duration
        }
        SourceType::Repository => {
            let stars = m("stars");
            let forks = m("forks");
            if stars.is_none() && forks.is_none() {
                return None;
            }
            0.6 * log_scaled(stars.unwrap_or(0.0), p.stars_saturation)
                + 0.4 * log_scaled(forks.unwrap_or(0.0), p.forks_saturation)
        }
        SourceType::Forum => {
            let comments = m("comments");
            let upvotes = m("upvotes").or_else(|| m("score"));
            if comments.is_none() && upvotes.is_none() {
                return None;
            }
            0.5 * log_scaled(comments.unwrap_or(0.0), p.comments_saturation)
                + 0.5 * log_scaled(upvotes.unwrap_or(0.0), p.upvotes_saturation)
        }
        SourceType::Search => {
            let rank = m("rank")?;
            if rank < 1.0 {
                return None;
            }
            ((p.search_depth + 1.0 - rank) / p.search_depth).clamp(0.0, 1.0)
        }
        SourceType::Feed => m("engagement")?,
    };
    Some(score.clamp(0.0, 1.0))
}

/// Body structure used as a completeness/actionability proxy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Structure {
    pub code_blocks: usize,
    pub enumerated_steps: usize,
}

pub(crate) fn structure_of(body: &str) -> Structure {
    let code_blocks = body.matches("```").count() / 2
        + body
            .lines()
            .filter(|l| l.starts_with("    ") && !l.trim().is_empty())
            .count()
            .min(1);
    let enumerated_steps = body
        .lines()
        .map(str::trim_start)
        .filter(|l| {
            let digits = l.chars().take_while(|c| c.is_ascii_digit()).count();
            (digits > 0 && matches!(l[digits..].chars().next(), Some('.') | Some(')')))
                || l.starts_with("- ")
                || l.starts_with("* ")
                || l.to_ascii_lowercase().starts_with("step ")
        })
        .count();
    Structure {
        code_blocks,
        enumerated_steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn rec(kind: SourceType, meta: serde_json::Value) -> ContentRecord {
        ContentRecord {
            id: "x".into(),
            source_id: "s".into(),
            source_type: kind,
            source_authority: 0.5,
            title: "t".into(),
            body: String::new(),
            url: String::new(),
            published_at: None,
            collected_at: Utc::now(),
            topics: vec![],
            metadata: meta.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn strategy_parses_as_tagged_variant() {
        #[derive(Deserialize)]
        struct W {
            strategy: ScoringStrategy,
        }
        let w: W = toml::from_str("[strategy]\nkind = \"generic\"\n").unwrap();
        assert_eq!(w.strategy, ScoringStrategy::Generic);
        let w: W = toml::from_str("[strategy]\nkind = \"source_aware\"\nsearch_depth = 20.0\n")
            .unwrap();
        match w.strategy {
            ScoringStrategy::SourceAware(p) => {
                assert_eq!(p.search_depth, 20.0);
                assert_eq!(p.stars_saturation, 50_000.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn repository_engagement_grows_with_stars() {
        let p = SourceAwareParams::default();
        let low = type_engagement(&rec(SourceType::Repository, json!({"stars": 10})), &p).unwrap();
        let high =
            type_engagement(&rec(SourceType::Repository, json!({"stars": 20000, "forks": 900})), &p)
                .unwrap();
        assert!(high > low);
        assert!(high <= 1.0);
    }

    #[test]
    fn search_rank_maps_linearly() {
        let p = SourceAwareParams::default();
        let first = type_engagement(&rec(SourceType::Search, json!({"rank": 1})), &p).unwrap();
        let tenth = type_engagement(&rec(SourceType::Search, json!({"rank": 10})), &p).unwrap();
        assert!((first - 1.0).abs() < 1e-9);
        assert!((tenth - 0.1).abs() < 1e-9);
    }

    #[test]
    fn missing_metadata_yields_none() {
        let p = SourceAwareParams::default();
        assert!(type_engagement(&rec(SourceType::Video, json!({})), &p).is_none());
    }

    #[test]
    fn structure_counts_code_and_steps() {
        let body = "Intro\n1. install\n2) configure\n- run it\n```rust\nfn main() {}\n```";
        let s = structure_of(body);
        assert_eq!(s.code_blocks, 1);
        assert_eq!(s.enumerated_steps, 3);
    }
}
