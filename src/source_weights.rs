//! # Source Authorities
//!
//! Configurable mapping from source ids (e.g. "rust-blog", "hn-frontpage")
//! to authority scores in `[0.0, 1.0]`.
//!
//! - Case-insensitive lookup with normalization of punctuation, dashes, etc.
//! - Aliases map alternative spellings to canonical ids.
//! - Lookup order: aliases → exact match → substring match → fuzzy match → default.
//!
//! `lookup` reports whether a configured entry was found, so the prioritizer
//! can flag the default as a fallback.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Jaro-Winkler similarity needed for a fuzzy hit.
const FUZZY_THRESHOLD: f64 = 0.92;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAuthorities {
    /// Used when no entry matches.
    #[serde(default = "default_authority")]
    pub default_authority: f64,
    #[serde(default)]
    pub authorities: HashMap<String, f64>,
    /// Non-canonical names → canonical names.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

fn default_authority() -> f64 {
    0.5
}

impl Default for SourceAuthorities {
    fn default() -> Self {
        Self {
            default_authority: default_authority(),
            authorities: HashMap::new(),
            aliases: HashMap::new(),
        }
    }
}

impl SourceAuthorities {
    /// Keys normalized once so lookups can compare directly.
    pub fn normalized(mut self) -> Self {
        self.authorities = self
            .authorities
            .into_iter()
            .map(|(k, v)| (normalize(&k), v))
            .collect();
        self.aliases = self
            .aliases
            .into_iter()
            .map(|(k, v)| (normalize(&k), normalize(&v)))
            .collect();
        self
    }

    /// Configured authority for `source`, or `None` when only the default applies.
    pub fn lookup(&self, source: &str) -> Option<f64> {
        let s = normalize(source);

        // 1) Alias resolution.
        if let Some(canon) = self.aliases.get(&s) {
            if let Some(&w) = self.authorities.get(canon) {
                return Some(clamp01(w));
            }
        }

        // 2) Exact match.
        if let Some(&w) = self.authorities.get(&s) {
            return Some(clamp01(w));
        }

        // 3) Substring fallback ("rust blog weekly" → "rust blog"); longest key wins.
        if let Some((_, &w)) = self
            .authorities
            .iter()
            .filter(|(k, _)| !k.is_empty() && s.contains(k.as_str()))
            .max_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| b.0.cmp(a.0)))
        {
            return Some(clamp01(w));
        }

        // 4) Fuzzy match for typos and near-identical ids.
        self.authorities
            .iter()
            .map(|(k, &w)| (strsim::jaro_winkler(&s, k), k, w))
            .filter(|(sim, _, _)| *sim >= FUZZY_THRESHOLD)
            .max_by(|a, b| a.0.total_cmp(&b.0).then_with(|| b.1.cmp(a.1)))
            .map(|(_, _, w)| clamp01(w))
    }

    /// Authority with the default applied.
    pub fn weight_for(&self, source: &str) -> f64 {
        self.lookup(source)
            .unwrap_or_else(|| clamp01(self.default_authority))
    }
}

/// Normalize input string: lowercase, replace punctuation/dashes with spaces,
/// collapse multiple spaces into one.
fn normalize(s: &str) -> String {
    let mut out = s.trim().to_lowercase();

    // Replace common separators with spaces.
    for ch in ['—', '–', '-', '_', '/', '\\'] {
        out = out.replace(ch, " ");
    }

    // Replace disruptive punctuation/whitespace with spaces.
    out = out.replace(['\n', '\r', '\t', '.', ',', '‚', '’', '\''], " ");

    // Collapse multiple spaces.
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        return 0.0;
    }
    x.clamp(0.0, 1.0)
}
