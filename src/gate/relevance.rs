// src/gate/relevance.rs
//! Relevance filter: tokenizer, config types, regex compilation, proximity
//! checks and the allow/deny decision.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::gate::Admission;

/// A single token with byte span and sequential index
#[derive(Debug, Clone)]
pub struct Token {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub index: usize, // 0-based token index in the sequence
}

/// Basic, Unicode-friendly tokenizer.
pub fn tokenize(input: &str) -> Vec<Token> {
    static RE: OnceCell<Regex> = OnceCell::new();
    // \w covers [A-Za-z0-9_]; (?u) enables Unicode
    let re = RE.get_or_init(|| Regex::new(r"(?u)\b\w+\b").expect("tokenizer regex"));
    re.find_iter(input)
        .enumerate()
        .map(|(i, m)| Token {
            text: m.as_str().to_string(),
            start: m.start(),
            end: m.end(),
            index: i,
        })
        .collect()
}

/* ----------------------------
Config schema (from TOML)
---------------------------- */

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceConfig {
    /// Any match admits immediately, before deny rules run.
    pub high_value: Vec<PatternCfg>,
    pub allow: Vec<PatternCfg>,
    pub deny: Vec<DenyCfg>,
    /// Strong context that lifts every deny rule when present.
    pub overrides: Vec<PatternCfg>,
    /// Topic tags that count as an allow match.
    pub allowed_topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternCfg {
    pub id: String,
    pub pattern: String, // regex (already escaped in TOML)
    #[serde(default)]
    pub near: Option<NearCfg>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenyCfg {
    pub id: String,
    pub pattern: String,
    pub reason: String,
    #[serde(default)]
    pub near: Option<NearCfg>,
    #[serde(default)]
    pub unless_near: Option<NearCfg>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearCfg {
    pub pattern: String,
    pub window: usize,
}

/* ----------------------------
Compiled structures
---------------------------- */

#[derive(Debug)]
struct CompiledPattern {
    id: String,
    re: Regex,
    near: Option<(Regex, usize)>,
}

#[derive(Debug)]
struct CompiledDeny {
    id: String,
    reason: String,
    re: Regex,
    near: Option<(Regex, usize)>,
    unless_near: Option<(Regex, usize)>,
}

fn compile(id: &str, pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::Pattern {
        id: id.to_string(),
        source,
    })
}

fn compile_near(id: &str, near: &Option<NearCfg>) -> Result<Option<(Regex, usize)>, ConfigError> {
    near.as_ref()
        .map(|nc| Ok((compile(&format!("{id}.near"), &nc.pattern)?, nc.window)))
        .transpose()
}

impl CompiledPattern {
    fn new(cfg: &PatternCfg) -> Result<Self, ConfigError> {
        Ok(Self {
            id: cfg.id.clone(),
            re: compile(&cfg.id, &cfg.pattern)?,
            near: compile_near(&cfg.id, &cfg.near)?,
        })
    }
}

/// Holds compiled regexes; immutable after construction, so it can be
/// shared across workers freely.
#[derive(Debug)]
pub struct RelevanceFilter {
    high_value: Vec<CompiledPattern>,
    allow: Vec<CompiledPattern>,
    deny: Vec<CompiledDeny>,
    overrides: Vec<CompiledPattern>,
    allowed_topics: Vec<String>,
}

impl RelevanceFilter {
    pub fn from_config(cfg: &RelevanceConfig) -> Result<Self, ConfigError> {
        let patterns = |list: &[PatternCfg]| {
            list.iter()
                .map(CompiledPattern::new)
                .collect::<Result<Vec<_>, _>>()
        };
        let deny = cfg
            .deny
            .iter()
            .map(|d| {
                Ok(CompiledDeny {
                    id: d.id.clone(),
                    reason: d.reason.clone(),
                    re: compile(&d.id, &d.pattern)?,
                    near: compile_near(&d.id, &d.near)?,
                    unless_near: compile_near(&format!("{}.unless", d.id), &d.unless_near)?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            high_value: patterns(&cfg.high_value)?,
            allow: patterns(&cfg.allow)?,
            deny,
            overrides: patterns(&cfg.overrides)?,
            allowed_topics: cfg
                .allowed_topics
                .iter()
                .map(|t| t.trim().to_lowercase())
                .collect(),
        })
    }

    /// Tokenize once and return tokens + byte->token index for proximity checks.
    #[allow(clippy::needless_range_loop)]
    fn tokenize_with_index(text: &str) -> (Vec<Token>, Vec<usize>) {
        let tokens = tokenize(text);
        let mut byte_to_tok = vec![usize::MAX; text.len() + 1];
        for t in &tokens {
            for i in t.start..=t.end {
                byte_to_tok[i] = t.index;
            }
        }
        // Backfill gaps with previous known index
        let mut last = usize::MAX;
        for i in 0..byte_to_tok.len() {
            if byte_to_tok[i] == usize::MAX {
                byte_to_tok[i] = last;
            } else {
                last = byte_to_tok[i];
            }
        }
        (tokens, byte_to_tok)
    }

    /// Map a regex match's start byte into a token index (best effort).
    fn token_index_for_start(byte_to_tok: &[usize], start: usize) -> Option<usize> {
        byte_to_tok
            .get(start)
            .copied()
            .filter(|idx| *idx != usize::MAX)
    }

    /// True if any main-match token is within `window` tokens of any near-match token.
    fn within_window(main_idxs: &[usize], near_idxs: &[usize], window: usize) -> bool {
        main_idxs
            .iter()
            .any(|&a| near_idxs.iter().any(|&b| a.abs_diff(b) <= window))
    }

    fn match_token_indices(re: &Regex, text: &str, byte_to_tok: &[usize]) -> Vec<usize> {
        re.find_iter(text)
            .filter_map(|m| Self::token_index_for_start(byte_to_tok, m.start()))
            .collect()
    }

    /// Main match plus optional `near` qualification; returns matched token indices.
    fn qualified_hits(
        re: &Regex,
        near: &Option<(Regex, usize)>,
        text: &str,
        byte_to_tok: &[usize],
    ) -> Vec<usize> {
        let main_idxs = Self::match_token_indices(re, text, byte_to_tok);
        if main_idxs.is_empty() {
            return main_idxs;
        }
        if let Some((near_re, win)) = near {
            let near_idxs = Self::match_token_indices(near_re, text, byte_to_tok);
            if near_idxs.is_empty() || !Self::within_window(&main_idxs, &near_idxs, *win) {
                return Vec::new();
            }
        }
        main_idxs
    }

    fn first_match<'a>(
        list: &'a [CompiledPattern],
        text: &str,
        byte_to_tok: &[usize],
    ) -> Option<&'a CompiledPattern> {
        list.iter()
            .find(|p| !Self::qualified_hits(&p.re, &p.near, text, byte_to_tok).is_empty())
    }

    /// high-value → deny (unless overridden) → allow/topic → open or reject.
    pub fn evaluate(&self, title: &str, body: &str, topics: &[String]) -> Admission {
        let text = if body.is_empty() {
            title.to_string()
        } else {
            format!("{title}\n{body}")
        };
        let (_tokens, byte_to_tok) = Self::tokenize_with_index(&text);

        // 1) High-value terms short-circuit
        if let Some(p) = Self::first_match(&self.high_value, &text, &byte_to_tok) {
            return Admission::admit(format!("high_value:{}", p.id));
        }

        // 2) Deny rules with contextual overrides
        let global_override = Self::first_match(&self.overrides, &text, &byte_to_tok);
        let mut overridden: Option<String> = None;
        for d in &self.deny {
            let hits = Self::qualified_hits(&d.re, &d.near, &text, &byte_to_tok);
            if hits.is_empty() {
                continue;
            }
            if let Some((unless_re, win)) = &d.unless_near {
                let unless_idxs = Self::match_token_indices(unless_re, &text, &byte_to_tok);
                if !unless_idxs.is_empty() && Self::within_window(&hits, &unless_idxs, *win) {
                    overridden.get_or_insert_with(|| format!("override:{}:context", d.id));
                    continue;
                }
            }
            if let Some(o) = global_override {
                overridden.get_or_insert_with(|| format!("override:{}:{}", d.id, o.id));
                continue;
            }
            return Admission::reject(format!("deny:{}:{}", d.id, d.reason));
        }

        // 3) Allow-list and topic tags
        if let Some(p) = Self::first_match(&self.allow, &text, &byte_to_tok) {
            return Admission::admit(format!("allow:{}", p.id));
        }
        if let Some(t) = topics
            .iter()
            .map(|t| t.to_lowercase())
            .find(|t| self.allowed_topics.contains(t))
        {
            return Admission::admit(format!("topic:{t}"));
        }
        if let Some(reason) = overridden {
            return Admission::admit(reason);
        }

        // 4) No allow-list configured → open gate
        if self.allow.is_empty() && self.allowed_topics.is_empty() {
            return Admission::admit("open");
        }
        Admission::reject("no_allow_match")
    }
}

/* ----------------------------
Tests
---------------------------- */
