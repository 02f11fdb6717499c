//! Prompt assembly: group system prompt + user model + recent summaries +
//! knowledge-engine context, trimmed to a fixed token budget with every
//! knowledge snippet carrying its source so the container can cite it.

use corvus_core::types::{GroupId, MemoryLayer};
use corvus_knowledge::{SearchEngine, SearchFilter, SearchHit, SearchMode, SearchQuery};

/// Rough token budget for the assembled prompt. We approximate tokens as
/// `chars / 4`, which is close enough for a soft budget — the container's
/// own tokenizer makes the real accounting.
const TOKEN_BUDGET: usize = 4000;
const CHARS_PER_TOKEN: usize = 4;
const MAX_KNOWLEDGE_HITS: usize = 8;

/// One knowledge snippet folded into the prompt, with enough of its
/// provenance left attached for source attribution in the reply.
#[derive(Debug, Clone)]
pub struct Attribution {
    pub document_id: String,
    pub title: String,
}

pub struct AssembledPrompt {
    pub text: String,
    pub attributions: Vec<Attribution>,
}

/// Build the prompt handed to a container for `query`, within `group`.
///
/// Order of inclusion, most important first, each truncated once the
/// running budget is exhausted: group system prompt, user-model summary,
/// recent conversation summaries, knowledge-engine hits.
pub async fn assemble(
    search: &SearchEngine,
    group: &GroupId,
    system_prompt: &str,
    user_model: Option<&str>,
    recent_summaries: &[String],
    query: &str,
) -> AssembledPrompt {
    let mut budget = TOKEN_BUDGET * CHARS_PER_TOKEN;
    let mut sections = Vec::new();

    push_section(&mut sections, &mut budget, system_prompt);
    if let Some(model) = user_model {
        push_section(&mut sections, &mut budget, &format!("User model:\n{model}"));
    }
    if !recent_summaries.is_empty() {
        let joined = recent_summaries.join("\n");
        push_section(&mut sections, &mut budget, &format!("Recent context:\n{joined}"));
    }

    let hits = knowledge_context(search, group, query).await;
    let mut attributions = Vec::new();
    if !hits.is_empty() {
        let mut block = String::from("Knowledge engine results:\n");
        for hit in &hits {
            block.push_str(&format!("- [{}] {}: {}\n", hit.document_id, hit.title, hit.snippet));
            attributions.push(Attribution { document_id: hit.document_id.clone(), title: hit.title.clone() });
        }
        push_section(&mut sections, &mut budget, &block);
    }

    push_section(&mut sections, &mut budget, &format!("User:\n{query}"));

    AssembledPrompt { text: sections.join("\n\n"), attributions }
}

fn push_section(sections: &mut Vec<String>, budget: &mut usize, text: &str) {
    if *budget == 0 {
        return;
    }
    let truncated: String = if text.len() > *budget {
        text.chars().take(*budget).collect()
    } else {
        text.to_string()
    };
    *budget = budget.saturating_sub(truncated.len());
    sections.push(truncated);
}

async fn knowledge_context(search: &SearchEngine, group: &GroupId, query: &str) -> Vec<SearchHit> {
    let filter = SearchFilter {
        type_filter: None,
        project_filter: if group.is_main() { None } else { Some(group.as_str().to_string()) },
        layer_filter: Some(MemoryLayer::Semantic),
    };
    let result = search
        .search(SearchQuery {
            text: query.to_string(),
            mode: SearchMode::Hybrid,
            filter,
            limit: MAX_KNOWLEDGE_HITS,
            expected_lexical_dominant: false,
        })
        .await;
    result.unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_budget_truncates_oversized_text() {
        let mut sections = Vec::new();
        let mut budget = 10;
        push_section(&mut sections, &mut budget, "this is definitely longer than ten chars");
        assert_eq!(sections[0].len(), 10);
        assert_eq!(budget, 0);
    }

    #[test]
    fn exhausted_budget_drops_later_sections() {
        let mut sections = Vec::new();
        let mut budget = 5;
        push_section(&mut sections, &mut budget, "abcde");
        push_section(&mut sections, &mut budget, "should not appear");
        assert_eq!(sections.len(), 1);
    }
}
