// tests/gate_override.rs
//
// Relevance gate behaviour through the public `Gate`: deny terms, contextual
// and global overrides, high-value short-circuit, language rejection.

use topic_radar::gate::relevance::{DenyCfg, NearCfg, PatternCfg, RelevanceConfig};
use topic_radar::gate::{Gate, GateConfig};

fn pattern(id: &str, re: &str) -> PatternCfg {
    PatternCfg {
        id: id.into(),
        pattern: re.into(),
        near: None,
    }
}

fn gate() -> Gate {
    let cfg = GateConfig {
        relevance: RelevanceConfig {
            high_value: vec![pattern("cve", r"(?i)\bcve-\d{4}-\d+\b")],
            allow: vec![pattern("rust", r"(?i)\b(rust|cargo|tokio)\b")],
            deny: vec![
                DenyCfg {
                    id: "rust_game".into(),
                    pattern: r"(?i)\brust\b".into(),
                    reason: "game".into(),
                    near: Some(NearCfg {
                        pattern: r"(?i)\b(server|wipe|raid)\b".into(),
                        window: 6,
                    }),
                    unless_near: Some(NearCfg {
                        pattern: r"(?i)\b(crate|compiler|cargo)\b".into(),
                        window: 8,
                    }),
                },
                DenyCfg {
                    id: "promo".into(),
                    pattern: r"(?i)\bgiveaway\b".into(),
                    reason: "promotion".into(),
                    near: None,
                    unless_near: None,
                },
            ],
            overrides: vec![pattern("lang", r"(?i)\b(borrow checker|programming language)\b")],
            allowed_topics: vec!["rust".into()],
        },
        ..Default::default()
    };
    Gate::from_config(&cfg).expect("gate config")
}

#[test]
fn deny_term_with_strong_topic_context_is_admitted() {
    let g = gate();
    let a = g.admit_parts(
        "Rust server wipe broke our compiler crate build",
        "The cargo workspace failed after the update and we had to pin the toolchain.",
        &[],
    );
    assert!(a.admitted, "{a:?}");
    assert_eq!(a.reason, "allow:rust");
}

#[test]
fn deny_term_without_context_is_rejected() {
    let g = gate();
    let a = g.admit_parts(
        "Rust server wipe tonight",
        "Join the raid on the biggest base on the server after the wipe.",
        &[],
    );
    assert!(!a.admitted);
    assert_eq!(a.reason, "deny:rust_game:game");
}

#[test]
fn global_override_rescues_a_denied_record() {
    let g = gate();
    let a = g.admit_parts(
        "Giveaway: signed copies of the book on the borrow checker",
        "We are giving away five copies to readers who are learning the language.",
        &[],
    );
    assert!(a.admitted, "{a:?}");
    assert_eq!(a.reason, "override:promo:lang");
}

#[test]
fn high_value_terms_skip_deny_rules() {
    let g = gate();
    let a = g.admit_parts(
        "Giveaway of details: CVE-2025-1234 affects the image crate",
        "",
        &[],
    );
    assert_eq!(a.reason, "high_value:cve");
}

#[test]
fn topic_tags_count_as_allow_and_unmatched_text_is_rejected() {
    let g = gate();
    let tagged = g.admit_parts(
        "Weekly newsletter issue 600",
        "A collection of links about the things that happened this week.",
        &["Rust".into()],
    );
    assert_eq!(tagged.reason, "topic:rust");

    let untagged = g.admit_parts(
        "Weekly newsletter issue 600",
        "A collection of links about the things that happened this week.",
        &[],
    );
    assert!(!untagged.admitted);
    assert_eq!(untagged.reason, "no_allow_match");
}

#[test]
fn confident_non_target_language_is_rejected_before_relevance() {
    let g = gate();
    let a = g.admit_parts(
        "Die neue Version von Rust ist da",
        "Die Entwickler haben die Version mit vielen Verbesserungen für den Compiler und die Werkzeuge veröffentlicht.",
        &[],
    );
    assert!(!a.admitted, "{a:?}");
    assert!(a.reason.starts_with("language:de:"));
}
