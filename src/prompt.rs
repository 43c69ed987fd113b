//! Prompt text handed to the downstream answer generator.

use crate::passage::truncate_chars;
use crate::retriever::SearchResult;

pub const SYSTEM_INSTRUCTIONS: &str = "\
You answer questions about government schemes using ONLY the passages provided.

Rules:
1. Do NOT show reasoning or <think> tags.
2. Answer briefly and directly.
3. Use the SAME LANGUAGE as the user.
4. Use ONLY the facts from the passages.
5. Include Scheme Name, Description, Benefits, Eligibility, Documents, Authority, Application Mode when available.
6. If no passage is relevant, reply: \"no relevant scheme found\".";

const NO_PASSAGES: &str = "NO PASSAGES FOUND.";

/// Strips characters that would let a question break out of the template.
pub fn clean_question(question: &str) -> String {
    question.trim().replace('"', "'").replace('`', "")
}

pub fn build_prompt(question: &str, results: &[SearchResult], max_passage_chars: usize) -> String {
    let passages: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let text = truncate_chars(r.passage.trim(), max_passage_chars);
            format!("PASSAGE {}:\n{}", i + 1, text)
        })
        .collect();

    let passage_block = if passages.is_empty() {
        NO_PASSAGES.to_string()
    } else {
        passages.join("\n\n")
    };

    format!(
        "{}\n\nUser question: {}\n\nPassages:\n{}\n\nAnswer:\n",
        SYSTEM_INSTRUCTIONS,
        clean_question(question),
        passage_block
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::DocumentRecord;

    fn result(passage: &str) -> SearchResult {
        SearchResult {
            doc_id: 0,
            score: 0.9,
            passage: passage.to_string(),
            record: DocumentRecord::default(),
        }
    }

    #[test]
    fn numbers_passages_and_cleans_question() {
        let prompt = build_prompt(
            " which \"pension\" `scheme`? ",
            &[result("Old Age Pension"), result("Widow Pension")],
            1200,
        );
        assert!(prompt.contains("User question: which 'pension' scheme?\n"));
        assert!(prompt.contains("PASSAGE 1:\nOld Age Pension\n\nPASSAGE 2:\nWidow Pension"));
        assert!(prompt.ends_with("Answer:\n"));
    }

    #[test]
    fn empty_results_say_so() {
        let prompt = build_prompt("anything", &[], 1200);
        assert!(prompt.contains("Passages:\nNO PASSAGES FOUND.\n"));
    }

    #[test]
    fn long_passages_are_cut() {
        let prompt = build_prompt("q", &[result("1234567890ABCDEF")], 10);
        assert!(prompt.contains("PASSAGE 1:\n1234567890\n"));
        assert!(!prompt.contains("ABCDEF"));
    }
}
