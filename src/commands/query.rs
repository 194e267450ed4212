//! Search command implementation

use crate::error::Result;
use crate::retrieve::Retriever;
use crate::store::SearchHit;
use serde::Serialize;
use tracing::info;

/// Search result for CLI display
#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub query: String,
    pub collection: String,
    pub hits: Vec<SearchHit>,
}

/// Run a raw retrieval, without condensing or generation
pub async fn cmd_search(retriever: &Retriever, query: &str, top_k: usize) -> Result<SearchResults> {
    info!("Searching {} for: {}", retriever.collection(), query);

    let hits = retriever.search(query, top_k).await?;

    Ok(SearchResults {
        query: query.to_string(),
        collection: retriever.collection().to_string(),
        hits,
    })
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.trim().replace('\n', " ");
    if flat.chars().count() > max_chars {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut.trim_end())
    } else {
        flat
    }
}

/// Print search results to console
pub fn print_search_results(results: &SearchResults) {
    println!("\n🔍 Query: {}\n", results.query);
    println!("Found {} abstracts in {}:\n", results.hits.len(), results.collection);

    for (i, hit) in results.hits.iter().enumerate() {
        let payload = &hit.payload;
        println!(
            "{}. [score: {:.3}] PMID {}",
            i + 1,
            hit.score,
            payload.pmid.unwrap_or(hit.id as i64)
        );

        if let Some(title) = &payload.title {
            println!("   Title: {}", title);
        }
        match (&payload.authors, payload.publication_year) {
            (Some(authors), Some(year)) => println!("   {} ({})", preview(authors, 80), year),
            (Some(authors), None) => println!("   {}", preview(authors, 80)),
            (None, Some(year)) => println!("   ({})", year),
            (None, None) => {}
        }
        if let Some(abstract_text) = &payload.abstract_text {
            println!("   {}", preview(abstract_text, 200));
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::MockEmbedder;
    use crate::store::{CollectionSpec, DocumentPayload, InMemoryIndex, VectorIndex};
    use std::sync::Arc;

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("short\ntext", 20), "short text");
        assert_eq!(preview("αβγδε", 3), "αβγ...");
    }

    #[tokio::test]
    async fn test_search_reports_hits() {
        let index = Arc::new(InMemoryIndex::new());
        index
            .create_collection(&CollectionSpec::new("abstracts", 2))
            .await
            .unwrap();
        index
            .upload(
                "abstracts",
                &[5],
                &[vec![1.0, 0.0]],
                &[DocumentPayload {
                    pmid: Some(5),
                    title: Some("Concussion imaging".to_string()),
                    ..Default::default()
                }],
            )
            .await
            .unwrap();
        let retriever = Retriever::new(Arc::new(MockEmbedder::new(2)), index, "abstracts");

        let results = cmd_search(&retriever, "concussion mri", 3).await.unwrap();
        assert_eq!(results.collection, "abstracts");
        assert_eq!(results.hits.len(), 1);
        assert_eq!(results.hits[0].payload.pmid, Some(5));

        let json = serde_json::to_value(&results).unwrap();
        assert_eq!(json["hits"][0]["payload"]["title"], "Concussion imaging");
    }
}
