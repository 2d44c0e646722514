//! Language filter: script analysis plus stop-word profiles.
//!
//! Detection is heuristic, so the filter only rejects when it is confident
//! the text is in a non-target language. Text under `min_chars` is admitted.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::gate::relevance::tokenize;
use crate::gate::Admission;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    /// ISO 639-1 codes to keep.
    pub targets: Vec<String>,
    pub min_confidence: f64,
    pub min_chars: usize,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            targets: vec!["en".into()],
            min_confidence: 0.7,
            min_chars: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LanguageGuess {
    /// ISO 639-1 code, or "und" when nothing matched.
    pub language: String,
    pub confidence: f64,
}

const PROFILES: &[(&str, &[&str])] = &[
    (
        "en",
        &[
            "the", "and", "of", "to", "is", "in", "that", "it", "for", "with", "on", "this",
            "are", "was", "be", "by", "from", "have", "not", "you", "what", "how", "new",
            "will", "can", "your", "about",
        ],
    ),
    (
        "de",
        &[
            "der", "die", "das", "und", "ist", "nicht", "ein", "eine", "mit", "für", "von",
            "auf", "den", "dem", "zu", "sich", "auch", "wird", "hat", "sind", "im", "wie",
        ],
    ),
    (
        "fr",
        &[
            "le", "la", "les", "et", "est", "des", "une", "un", "pour", "dans", "que", "qui",
            "pas", "sur", "avec", "du", "au", "ce", "sont", "nous",
        ],
    ),
    (
        "es",
        &[
            "el", "los", "las", "y", "es", "del", "una", "por", "para", "con", "que", "se",
            "como", "pero", "más", "muy", "está", "son",
        ],
    ),
    (
        "pt",
        &[
            "o", "os", "e", "é", "do", "da", "dos", "das", "um", "uma", "para", "com", "não",
            "em", "que", "mais", "como", "são",
        ],
    ),
    (
        "it",
        &[
            "il", "lo", "gli", "e", "è", "di", "che", "non", "per", "una", "con", "sono",
            "della", "del", "anche", "come", "questo",
        ],
    ),
    (
        "nl",
        &[
            "de", "het", "een", "en", "van", "niet", "dat", "op", "te", "voor", "met", "zijn",
            "ook", "maar", "wordt",
        ],
    ),
];

const TECH_TERMS: &[&str] = &[
    "API", "URL", "HTTP", "HTTPS", "JSON", "XML", "SQL", "CSS", "HTML", "AI", "ML", "LLM",
    "GPU", "CPU", "SDK", "CLI", "UI", "UX", "OS", "VM", "RAM",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Latin,
    Cyrillic,
    Greek,
    Arabic,
    Hebrew,
    Han,
    Kana,
    Hangul,
    Devanagari,
    Thai,
}

impl Script {
    fn of(c: char) -> Option<Self> {
        let cp = c as u32;
        let s = match cp {
            _ if c.is_ascii_alphabetic() => Script::Latin,
            0x00C0..=0x024F | 0x1E00..=0x1EFF => Script::Latin,
            0x0370..=0x03FF => Script::Greek,
            0x0400..=0x04FF => Script::Cyrillic,
            0x0590..=0x05FF => Script::Hebrew,
            0x0600..=0x06FF => Script::Arabic,
            0x0900..=0x097F => Script::Devanagari,
            0x0E00..=0x0E7F => Script::Thai,
            0x3040..=0x30FF => Script::Kana,
            0x4E00..=0x9FFF | 0x3400..=0x4DBF => Script::Han,
            0xAC00..=0xD7AF | 0x1100..=0x11FF => Script::Hangul,
            _ => return None,
        };
        Some(s)
    }

    fn language(self) -> &'static str {
        match self {
            Script::Latin => "und",
            Script::Cyrillic => "ru",
            Script::Greek => "el",
            Script::Arabic => "ar",
            Script::Hebrew => "he",
            Script::Han => "zh",
            Script::Kana => "ja",
            Script::Hangul => "ko",
            Script::Devanagari => "hi",
            Script::Thai => "th",
        }
    }
}

/// Strip URLs, e-mail addresses, code and technical acronyms that skew detection.
pub fn clean_for_detection(text: &str) -> String {
    static RE_NOISE: OnceCell<Regex> = OnceCell::new();
    let re = RE_NOISE.get_or_init(|| {
        Regex::new(
            r"(?s)```.*?```|`[^`]*`|https?://\S+|www\.\S+|[\w.+-]+@[\w-]+\.[\w.-]+",
        )
        .expect("noise regex")
    });
    static RE_TECH: OnceCell<Regex> = OnceCell::new();
    let tech = RE_TECH.get_or_init(|| {
        Regex::new(&format!(r"\b(?:{})\b", TECH_TERMS.join("|"))).expect("tech regex")
    });
    let out = re.replace_all(text, " ");
    let out = tech.replace_all(&out, " ");
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone)]
pub struct LanguageFilter {
    cfg: LanguageConfig,
}

impl LanguageFilter {
    pub fn new(cfg: LanguageConfig) -> Self {
        let targets = cfg.targets.iter().map(|t| t.trim().to_lowercase()).collect();
        Self {
            cfg: LanguageConfig { targets, ..cfg },
        }
    }

    pub fn detect(&self, text: &str) -> LanguageGuess {
        let clean = clean_for_detection(text);
        let len = clean.chars().count();

        let mut counts: Vec<(Script, usize)> = Vec::new();
        for s in clean.chars().filter_map(Script::of) {
            match counts.iter_mut().find(|(k, _)| *k == s) {
                Some((_, n)) => *n += 1,
                None => counts.push((s, 1)),
            }
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        let letters: usize = counts.iter().map(|(_, n)| n).sum();
        let Some(&(dominant, dominant_n)) = counts.first() else {
            return LanguageGuess {
                language: "und".into(),
                confidence: 0.3,
            };
        };
        // Japanese mixes kana with Han; any kana decides it
        let dominant = if dominant == Script::Han && counts.iter().any(|(s, _)| *s == Script::Kana)
        {
            Script::Kana
        } else {
            dominant
        };

        let mut confidence: f64 = 0.8;
        if len < 20 {
            confidence *= 0.5;
        } else if len < 50 {
            confidence *= 0.7;
        }
        let mixed = letters > 0 && (dominant_n as f64 / letters as f64) < 0.9;
        if mixed {
            confidence *= 0.8;
        }
        if len > 200 {
            confidence = (confidence * 1.1_f64).min(0.95);
        }

        if dominant != Script::Latin {
            return LanguageGuess {
                language: dominant.language().into(),
                confidence,
            };
        }

        let words: Vec<String> = tokenize(&clean)
            .into_iter()
            .map(|t| t.text.to_lowercase())
            .collect();
        let mut scored: Vec<(&str, usize)> = PROFILES
            .iter()
            .map(|(lang, stop)| {
                let hits = words.iter().filter(|w| stop.contains(&w.as_str())).count();
                (*lang, hits)
            })
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        let (best, best_hits) = scored[0];
        let second_hits = scored.get(1).map(|s| s.1).unwrap_or(0);
        if best_hits == 0 {
            return LanguageGuess {
                language: "und".into(),
                confidence: 0.3,
            };
        }
        let margin = (best_hits - second_hits) as f64 / best_hits as f64;
        LanguageGuess {
            language: best.into(),
            confidence: confidence * (0.5 + 0.5 * margin),
        }
    }

    pub fn check(&self, title: &str, body: &str) -> Admission {
        let text = format!("{title} {body}");
        if text.trim().chars().count() < self.cfg.min_chars {
            return Admission::admit("language:short_text");
        }
        let guess = self.detect(&text);
        let targeted = self.cfg.targets.iter().any(|t| *t == guess.language);
        if !targeted && guess.confidence >= self.cfg.min_confidence {
            return Admission::reject(format!(
                "language:{}:{:.2}",
                guess.language, guess.confidence
            ));
        }
        Admission::admit(format!("language:{}", guess.language))
    }
}
