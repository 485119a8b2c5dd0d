//! Deterministic self-control rules
//!
//! The utterance is split into clauses and each clause is matched on its
//! own, so one sentence can carry several interface actions.

use std::sync::LazyLock;

use regex::Regex;

use crate::state::InteractionMode;
use crate::tools::UiAction;

static CLAUSE_SPLIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*(?:[,;]|\band then\b|\bthen\b|\band\b|\balso\b)\s*").expect("valid regex")
});

static MODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:switch|change|go|set|enter|use|move)\b.*\b(voice|chat|text)\s+mode\b")
        .expect("valid regex")
});

static CLEAR_CHAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:clear|wipe|erase|reset)\b.*\b(?:chat|conversation|messages)\b")
        .expect("valid regex")
});

static THEME_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(default|midnight|terminal|sunset|ocean)\b").expect("valid regex")
});

static THEME_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:switch|change)\s+(?:over\s+)?to\b").expect("valid regex")
});

static STATUS_BAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(show|display|unhide|bring back|open|hide|remove|close|get rid of)\b.*\bstatus\s*bar\b")
        .expect("valid regex")
});

static CHAT_PANEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(show|display|unhide|bring back|open|hide|remove|close|get rid of)\b.*\bchat\b")
        .expect("valid regex")
});

static UNMUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bunmute\b|\bturn (?:your )?(?:voice|sound) (?:back )?on\b").expect("valid regex"));

static MUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bmute\b|\bturn (?:your )?(?:voice|sound) off\b").expect("valid regex"));

/// Split an utterance into independently matched clauses
#[must_use]
pub fn split_clauses(utterance: &str) -> Vec<String> {
    CLAUSE_SPLIT
        .split(utterance)
        .map(|c| c.trim().trim_end_matches(['.', '!', '?']).trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect()
}

fn is_show_verb(verb: &str) -> bool {
    matches!(verb, "show" | "display" | "unhide" | "bring back" | "open")
}

/// Match one clause against the rules, most specific first
#[must_use]
pub fn match_clause(clause: &str) -> Option<UiAction> {
    if let Some(caps) = MODE.captures(clause) {
        let mode = if &caps[1] == "voice" {
            InteractionMode::Voice
        } else {
            InteractionMode::Chat
        };
        return Some(UiAction::SetMode(mode));
    }

    if CLEAR_CHAT.is_match(clause) {
        return Some(UiAction::ClearChat);
    }

    if let Some(caps) = THEME_NAME.captures(clause) {
        if clause.contains("theme") || THEME_VERB.is_match(clause) {
            return Some(UiAction::SetTheme(caps[1].to_string()));
        }
    }

    if let Some(caps) = STATUS_BAR.captures(clause) {
        return Some(if is_show_verb(&caps[1]) {
            UiAction::ShowStatusBar
        } else {
            UiAction::HideStatusBar
        });
    }

    if let Some(caps) = CHAT_PANEL.captures(clause) {
        return Some(if is_show_verb(&caps[1]) {
            UiAction::ShowChat
        } else {
            UiAction::HideChat
        });
    }

    if UNMUTE.is_match(clause) {
        return Some(UiAction::Unmute);
    }

    if MUTE.is_match(clause) {
        return Some(UiAction::Mute);
    }

    None
}

/// All self-control actions in utterance order
#[must_use]
pub fn match_self_control(utterance: &str) -> Vec<UiAction> {
    split_clauses(utterance)
        .iter()
        .filter_map(|clause| match_clause(clause))
        .collect()
}
