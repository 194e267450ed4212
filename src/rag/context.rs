//! Grounding context assembly

use crate::store::{DocumentPayload, SearchHit};

/// Rendered in place of a missing payload field
pub const ABSENT: &str = "N/A";

/// Context used when retrieval found nothing
pub const NO_CONTEXT: &str = "No relevant abstracts were found.";

/// Separator between rendered abstracts
pub const SEPARATOR: &str = "\n---\n";

/// Render one payload as a context block
pub fn render_payload(payload: &DocumentPayload) -> String {
    let year = payload
        .publication_year
        .map(|y| y.to_string())
        .unwrap_or_else(|| ABSENT.to_string());

    format!(
        "Title: {}\n\nPublication year: {}\n\nAuthors: {}\n\nAbstract: {}\n\n",
        payload.title.as_deref().unwrap_or(ABSENT),
        year,
        payload.authors.as_deref().unwrap_or(ABSENT),
        payload.abstract_text.as_deref().unwrap_or(ABSENT),
    )
}

/// Render hits, best first, into one context string. Never fails.
pub fn assemble(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return NO_CONTEXT.to_string();
    }

    hits.iter()
        .map(|hit| render_payload(&hit.payload))
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}

/// Split text into display fragments (`word + " "`)
pub fn word_fragments(text: &str) -> Vec<String> {
    text.split(' ').map(|word| format!("{} ", word)).collect()
}
