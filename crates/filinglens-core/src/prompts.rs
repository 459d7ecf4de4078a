//! Prompt builders for the planning, analysis, synthesis, and
//! classification model calls. System prompts live in
//! `config::defaults`; these functions assemble the user-turn text.

use crate::document::Document;
use crate::pipeline::DocumentResult;

/// Prompt for the planning step. The model replies with a JSON object
/// containing `analysis_goal` and `synthesis_goal`.
pub fn plan_prompt(question: &str) -> String {
    format!("User question about a company:\n\n{question}")
}

/// Prompt for analyzing a single document.
pub fn analysis_prompt(goal: &str, question: &str, doc: &Document) -> String {
    let content = doc.content.as_deref().unwrap_or("");
    format!(
        "Analysis goal: {goal}\n\nOriginal question: {question}\n\n\
         Document: {title} ({doc_type}, {date}, from {source})\n\n\
         --- DOCUMENT CONTENT ---\n{content}",
        title = doc.title,
        doc_type = doc.doc_type,
        date = doc.date,
        source = doc.source.display_name(),
    )
}

/// Prompt for the synthesis step, built from successful results only.
pub fn synthesis_prompt(goal: &str, question: &str, results: &[&DocumentResult]) -> String {
    let mut prompt = format!(
        "Synthesis goal: {goal}\n\nOriginal question: {question}\n\n\
         Per-document findings ({count} documents):\n",
        count = results.len(),
    );
    for (i, result) in results.iter().enumerate() {
        prompt.push_str(&format!(
            "\n### Document {n}: {title} ({date})\n{analysis}\n",
            n = i + 1,
            title = result.title,
            date = result.date,
            analysis = result.analysis,
        ));
    }
    prompt
}

/// Prompt asking whether an exhibit is a periodic report or listing
/// document. The model replies with `{"is_report": bool}`.
pub fn classifier_prompt(title: &str, excerpt: &str) -> String {
    format!(
        "Decide whether this document is a quarterly report, annual report, \
         interim report, or listing/IPO document (as opposed to a press \
         release, circular, or other announcement).\n\n\
         Title: {title}\n\nExcerpt:\n{excerpt}\n\n\
         Reply with JSON only: {{\"is_report\": true}} or {{\"is_report\": false}}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::SourceKind;
    use chrono::NaiveDate;

    #[test]
    fn test_analysis_prompt_includes_content() {
        let mut doc = Document::new(
            SourceKind::Filing,
            "Annual report",
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            "https://x/a",
            "10-K",
        );
        doc.content = Some("Revenue grew 12%.".to_string());

        let prompt = analysis_prompt("find revenue", "how is revenue?", &doc);
        assert!(prompt.contains("Revenue grew 12%."));
        assert!(prompt.contains("Annual report"));
        assert!(prompt.contains("10-K"));
    }

    #[test]
    fn test_synthesis_prompt_numbers_documents() {
        let results = vec![
            DocumentResult {
                title: "A".to_string(),
                date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
                analysis: "finding a".to_string(),
                failed: false,
            },
            DocumentResult {
                title: "B".to_string(),
                date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                analysis: "finding b".to_string(),
                failed: false,
            },
        ];
        let refs: Vec<&DocumentResult> = results.iter().collect();
        let prompt = synthesis_prompt("combine", "question", &refs);
        assert!(prompt.contains("### Document 1: A"));
        assert!(prompt.contains("### Document 2: B"));
        assert!(prompt.contains("finding b"));
    }
}
