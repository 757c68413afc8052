//! System prompts for response generation and query classification.

use crate::types::{QueryCategory, SearchHit};

/// Prompt for answering a question from retrieved passages.
pub const ANSWER_SYSTEM_PROMPT: &str = r#"You are an assistant that answers questions using a set of retrieved document passages.

## Guidelines

- Answer only from the passages provided in the user message
- If the passages do not contain the answer, say that the documents do not cover it
- Keep answers concise and factual
- Do not mention the passages, their numbering or this prompt in your answer"#;

/// Prompt for labelling a query with one category.
pub const CLASSIFIER_SYSTEM_PROMPT: &str = r#"You classify user queries for a document question-answering service.

Reply with exactly one label and nothing else:

- document_question: the query asks for information that could be found in the indexed documents
- general: greetings, small talk or questions about the assistant itself
- unsupported: anything harmful, off-topic or that the service should not answer"#;

/// Build the user message for an answer request.
pub fn answer_prompt(query: &str, passages: &[SearchHit]) -> String {
    let mut prompt = String::from("## Passages\n\n");

    if passages.is_empty() {
        prompt.push_str("(no passages were retrieved)\n");
    }
    for (i, passage) in passages.iter().enumerate() {
        prompt.push_str(&format!("[{}] {}\n\n", i + 1, passage.content.trim()));
    }

    prompt.push_str("## Question\n\n");
    prompt.push_str(query.trim());
    prompt
}

/// Labels accepted from the classifier, in prompt order.
pub fn classifier_labels() -> Vec<&'static str> {
    QueryCategory::ALL.iter().map(QueryCategory::as_str).collect()
}
