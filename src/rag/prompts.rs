//! Prompt templates
//!
//! Templates are data. The condense prompt is an instruction block followed
//! by question/search-query pairs; the answer template carries `{context}`
//! and `{query}` placeholders.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// One question to search-query demonstration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub question: String,
    pub search_query: String,
}

impl FewShotExample {
    pub fn new(question: impl Into<String>, search_query: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            search_query: search_query.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptTemplates {
    pub condense_instructions: String,
    pub examples: Vec<FewShotExample>,
    pub answer_template: String,
}

const CONDENSE_INSTRUCTIONS: &str = "Given a question, your task is to come up with a relevant search term that would retrieve relevant articles from a scientific article database. \
The search term should not be so specific as to be unlikely to retrieve any articles, but should also not be so general as to retrieve too many articles. \
The search term should be a single word or phrase, and should not contain any punctuation. Convert any initialisms to their full form.";

const ANSWER_TEMPLATE: &str = "Context information is below.\n\
---------------------\n\
{context}\n\
---------------------\n\
Given the context information above I want you to think step by step to answer the query in a crisp manner, in case you don't know the answer say 'I don't know!'.\n\
Query: {query}\n\
Answer: ";

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            condense_instructions: CONDENSE_INSTRUCTIONS.to_string(),
            examples: vec![
                FewShotExample::new(
                    "What are some treatments for diabetic macular edema?",
                    "diabetic macular edema",
                ),
                FewShotExample::new(
                    "What is the workup for a patient with a suspected pulmonary embolism?",
                    "pulmonary embolism treatment",
                ),
                FewShotExample::new(
                    "What is the recommended treatment for a grade 2 PCL tear?",
                    "Posterior cruciate ligament tear",
                ),
                FewShotExample::new(
                    "What are the possible complications associated with type 1 diabetes and how does it impact the eyes?",
                    "type 1 diabetes eyes",
                ),
                FewShotExample::new(
                    "When is an MRI recommended for a concussion?",
                    "concussion magnetic resonance imaging",
                ),
            ],
            answer_template: ANSWER_TEMPLATE.to_string(),
        }
    }
}

fn placeholder_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(context|query)\}").ok())
        .as_ref()
}

fn label_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*search\s+query\s*:\s*").ok())
        .as_ref()
}

impl PromptTemplates {
    /// Few-shot prompt asking the model for a search query
    pub fn condense_prompt(&self, question: &str) -> String {
        let mut prompt = String::with_capacity(self.condense_instructions.len() + 512);
        prompt.push_str(self.condense_instructions.trim_end());
        prompt.push('\n');
        for example in &self.examples {
            prompt.push_str("Question: ");
            prompt.push_str(&example.question);
            prompt.push_str("\nSearch Query: ");
            prompt.push_str(&example.search_query);
            prompt.push('\n');
        }
        prompt.push_str("Question: ");
        prompt.push_str(question.trim());
        prompt.push_str("\nSearch Query: ");
        prompt
    }

    /// Answer prompt. Substitution is single-pass, so placeholder text inside
    /// the context or question is left alone.
    pub fn answer_prompt(&self, context: &str, question: &str) -> String {
        let Some(re) = placeholder_re() else {
            return self
                .answer_template
                .replace("{query}", question)
                .replace("{context}", context);
        };
        re.replace_all(&self.answer_template, |caps: &regex::Captures<'_>| {
            match &caps[1] {
                "context" => context.to_string(),
                _ => question.to_string(),
            }
        })
        .into_owned()
    }

    pub fn validate(&self) -> Result<()> {
        if self.condense_instructions.trim().is_empty() {
            return Err(Error::Config(
                "prompts.condense_instructions must not be empty".to_string(),
            ));
        }
        for placeholder in ["{context}", "{query}"] {
            if !self.answer_template.contains(placeholder) {
                return Err(Error::Config(format!(
                    "prompts.answer_template must contain {}",
                    placeholder
                )));
            }
        }
        if let Some(example) = self
            .examples
            .iter()
            .find(|e| e.question.trim().is_empty() || e.search_query.trim().is_empty())
        {
            return Err(Error::Config(format!(
                "prompts.examples contains an incomplete example: {:?}",
                example
            )));
        }
        Ok(())
    }
}

/// Reduce a raw completion to a bare search query.
///
/// Keeps the first non-empty line, drops a leading `Search Query:` label,
/// then trims quotes and trailing punctuation. `None` if nothing is left.
pub fn normalize_search_query(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = label_re().map_or(line.into(), |re| re.replace(line, ""));
    let is_punct = |c: char| matches!(c, '.' | '?' | '!' | ';' | ',' | ':');
    let query = line
        .trim()
        .trim_end_matches(is_punct)
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .trim_end_matches(is_punct)
        .trim();

    if query.is_empty() {
        None
    } else {
        Some(query.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns_compile() {
        assert!(placeholder_re().is_some());
        assert!(label_re().is_some());
    }

    #[test]
    fn test_condense_prompt_layout() {
        let prompts = PromptTemplates::default();
        let prompt = prompts.condense_prompt("  What treats knee pain after a PCL tear? ");

        assert!(prompt.starts_with("Given a question"));
        assert!(prompt.contains(
            "Question: When is an MRI recommended for a concussion?\nSearch Query: concussion magnetic resonance imaging\n"
        ));
        assert!(prompt.ends_with(
            "Question: What treats knee pain after a PCL tear?\nSearch Query: "
        ));
        assert_eq!(prompt.matches("Search Query: ").count(), 6);
    }

    #[test]
    fn test_answer_prompt_is_single_pass() {
        let prompts = PromptTemplates::default();
        let prompt = prompts.answer_prompt("Title: {query}", "Why {context}?");

        assert!(prompt.contains("---------------------\nTitle: {query}\n---------------------"));
        assert!(prompt.contains("Query: Why {context}?\nAnswer: "));
    }

    #[test]
    fn test_validate_rejects_missing_placeholder() {
        let mut prompts = PromptTemplates::default();
        assert!(prompts.validate().is_ok());

        prompts.answer_template = "Answer {query}".to_string();
        assert!(matches!(prompts.validate(), Err(Error::Config(_))));

        let mut prompts = PromptTemplates::default();
        prompts.examples.push(FewShotExample::new("q", " "));
        assert!(prompts.validate().is_err());
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let prompts: PromptTemplates =
            toml::from_str("condense_instructions = \"Give a search term.\"").unwrap();
        assert_eq!(prompts.condense_instructions, "Give a search term.");
        assert_eq!(prompts.examples.len(), 5);
        assert!(prompts.answer_template.contains("{context}"));
    }

    #[test]
    fn test_normalize_search_query() {
        assert_eq!(
            normalize_search_query(" diabetic macular edema\nQuestion: next"),
            Some("diabetic macular edema".to_string())
        );
        assert_eq!(
            normalize_search_query("\n\nSearch Query: \"pulmonary embolism treatment\"."),
            Some("pulmonary embolism treatment".to_string())
        );
        assert_eq!(normalize_search_query("  \n \"\" \n"), None);
        assert_eq!(normalize_search_query(""), None);
    }
}
