//! Four-tier query classifier. Rules are evaluated in order; the first
//! match wins. No container is ever considered before the cheaper tiers
//! have had a chance to reject the message.

use corvus_core::types::Tier;
use serde::Serialize;

const CONTAINER_SHORT_CHAR_LIMIT: usize = 200;

const GREETINGS: &[&str] = &[
    "hi", "hello", "hey", "yo", "sup", "good morning", "good evening", "good afternoon",
    "สวัสดี", "หวัดดี",
];
const ACKNOWLEDGEMENTS: &[&str] = &[
    "thanks", "thank you", "thx", "ok", "okay", "k", "kk", "cool", "got it", "noted", "yes", "no",
    "yep", "nope", "sure", "alright",
];
const RECALL_VERBS: &[&str] = &["remember", "recall", "search", "find", "look up", "what did we", "did we discuss"];

/// Output of the router: the routing verdict plus enough metadata to feed
/// cost accounting and model selection.
#[derive(Debug, Clone, Serialize)]
pub struct QueryClassification {
    pub tier: Tier,
    pub model_hint: &'static str,
    pub confidence: f32,
    pub reason: &'static str,
}

/// Classify `text` into one of the four tiers. `text` is assumed already
/// trimmed of surrounding whitespace by the caller.
pub fn classify(text: &str) -> QueryClassification {
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();

    if trimmed.starts_with('/') {
        return QueryClassification {
            tier: Tier::Inline,
            model_hint: "none",
            confidence: 0.99,
            reason: "admin slash-command",
        };
    }

    if is_short_match(&lower, GREETINGS) || is_short_match(&lower, ACKNOWLEDGEMENTS) {
        return QueryClassification {
            tier: Tier::Inline,
            model_hint: "none",
            confidence: 0.95,
            reason: "greeting or acknowledgement",
        };
    }

    if RECALL_VERBS.iter().any(|v| lower.contains(v)) {
        return QueryClassification {
            tier: Tier::KnowledgeOnly,
            model_hint: "none",
            confidence: 0.85,
            reason: "memory-recall verb",
        };
    }

    let has_code_fence = trimmed.contains("```");
    let looks_multi_step = lower.contains("then ") || lower.contains("step by step") || lower.contains("and then");
    let looks_file_op = ["read file", "write file", "edit file", "create a file", "run the"]
        .iter()
        .any(|p| lower.contains(p));

    if has_code_fence || looks_multi_step || looks_file_op {
        return QueryClassification {
            tier: Tier::ContainerFull,
            model_hint: "strong",
            confidence: 0.8,
            reason: "code fence, multi-step reasoning, or file operation",
        };
    }

    if trimmed.chars().count() <= CONTAINER_SHORT_CHAR_LIMIT {
        return QueryClassification {
            tier: Tier::ContainerShort,
            model_hint: "cheap",
            confidence: 0.6,
            reason: "short general question",
        };
    }

    QueryClassification {
        tier: Tier::ContainerFull,
        model_hint: "strong",
        confidence: 0.55,
        reason: "long-form question exceeding the short-container budget",
    }
}

/// Whether the whole message (ignoring trailing punctuation) is one of `words`.
fn is_short_match(lower: &str, words: &[&str]) -> bool {
    let stripped = lower.trim_end_matches(|c: char| c == '!' || c == '.' || c == '?');
    words.iter().any(|w| *w == stripped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_is_inline() {
        let c = classify("Hello!");
        assert_eq!(c.tier, Tier::Inline);
    }

    #[test]
    fn non_ascii_greeting_is_inline() {
        let c = classify("สวัสดี");
        assert_eq!(c.tier, Tier::Inline);
    }

    #[test]
    fn admin_command_is_inline() {
        let c = classify("/status");
        assert_eq!(c.tier, Tier::Inline);
    }

    #[test]
    fn acknowledgement_is_inline() {
        let c = classify("thanks!");
        assert_eq!(c.tier, Tier::Inline);
    }

    #[test]
    fn recall_question_is_knowledge_only() {
        let c = classify("What did we decide about Docker?");
        assert_eq!(c.tier, Tier::KnowledgeOnly);
    }

    #[test]
    fn short_question_is_container_short() {
        let c = classify("What's a good name for a cat?");
        assert_eq!(c.tier, Tier::ContainerShort);
    }

    #[test]
    fn code_fence_is_container_full() {
        let c = classify("```\nwrite a python quicksort\n```");
        assert_eq!(c.tier, Tier::ContainerFull);
    }

    #[test]
    fn long_question_without_fence_falls_back_to_container_full() {
        let text = "a".repeat(CONTAINER_SHORT_CHAR_LIMIT + 1);
        let c = classify(&text);
        assert_eq!(c.tier, Tier::ContainerFull);
    }

    #[test]
    fn file_operation_is_container_full() {
        let c = classify("please read file config.toml and summarize it");
        assert_eq!(c.tier, Tier::ContainerFull);
    }
}
