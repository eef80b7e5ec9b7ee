//! Prompts for the vision and metadata-enrichment calls.
//!
//! Every prompt lives here so behaviour changes touch one place and tests
//! can inspect the text directly. Callers override the vision prompt through
//! [`crate::config::ParserConfig::vision_prompt`]; the constants apply only
//! when no override is given.

/// Default prompt sent with every cropped figure.
pub const DEFAULT_VISION_PROMPT: &str = "Extract all the details only for the charts and infographs present in the image. Don't miss out on any details for charts or infographs present. Provide the output in JSON format.";

/// System prompt for document-level metadata extraction.
pub const METADATA_SYSTEM_PROMPT: &str = r#"You extract document metadata. Reply with a single JSON object and nothing else, using exactly these keys:

- "title": the document title, or null if none is evident
- "summary": two or three sentences describing the document
- "keywords": an array of at most ten key terms
- "document_type": one of "report", "article", "invoice", "contract", "presentation", "form", "manual", "other"
- "language": ISO 639-1 code of the main language

Do NOT wrap the JSON in code fences. Do NOT add commentary."#;

/// Build the user message carrying the (truncated) document text.
pub fn metadata_request(text: &str) -> String {
    format!("Document text:\n\n\"\"\"{}\"\"\"", text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vision_prompt_asks_for_json() {
        assert!(DEFAULT_VISION_PROMPT.contains("charts and infographs"));
        assert!(DEFAULT_VISION_PROMPT.ends_with("Provide the output in JSON format."));
    }

    #[test]
    fn metadata_prompt_names_every_key() {
        for key in ["title", "summary", "keywords", "document_type", "language"] {
            assert!(METADATA_SYSTEM_PROMPT.contains(&format!("\"{key}\"")), "missing {key}");
        }
    }

    #[test]
    fn metadata_request_quotes_text() {
        assert_eq!(metadata_request("abc"), "Document text:\n\n\"\"\"abc\"\"\"");
    }
}
