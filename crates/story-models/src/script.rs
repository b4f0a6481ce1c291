//! Page-by-page story scripts produced by the script writer.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Errors from parsing or validating a script.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Malformed script JSON: {0}")]
    Malformed(String),

    #[error("Script has no pages")]
    Empty,

    #[error("Invalid page number {0} (pages are 1-based)")]
    InvalidPageNumber(u32),

    #[error("Duplicate page number {0}")]
    DuplicatePageNumber(u32),

    #[error("Page {0} has empty text")]
    EmptyText(u32),
}

/// One page of a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScriptPage {
    pub page_number: u32,

    /// Narration text
    pub text: String,

    /// Scene description used to build the image prompt
    pub image_description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
}

/// A complete script: title plus ordered pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StoryScript {
    pub title: String,
    pub pages: Vec<ScriptPage>,
}

impl StoryScript {
    /// Check the structural contract: non-empty, 1-based unique page numbers, text present.
    pub fn validate(&self) -> Result<(), ScriptError> {
        if self.pages.is_empty() {
            return Err(ScriptError::Empty);
        }

        let mut seen = HashSet::with_capacity(self.pages.len());
        for page in &self.pages {
            if page.page_number == 0 {
                return Err(ScriptError::InvalidPageNumber(page.page_number));
            }
            if !seen.insert(page.page_number) {
                return Err(ScriptError::DuplicatePageNumber(page.page_number));
            }
            if page.text.trim().is_empty() {
                return Err(ScriptError::EmptyText(page.page_number));
            }
        }

        Ok(())
    }

    /// Parse an LLM response into a validated script.
    ///
    /// Tolerates a markdown code fence around the JSON body.
    pub fn from_llm_json(raw: &str) -> Result<Self, ScriptError> {
        let body = strip_code_fence(raw);
        let mut script: StoryScript =
            serde_json::from_str(body).map_err(|e| ScriptError::Malformed(e.to_string()))?;
        script.validate()?;
        script.pages.sort_by_key(|p| p.page_number);
        Ok(script)
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the optional language tag on the opening fence line
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"{
        "title": "Mia and the Moon",
        "pages": [
            {"page_number": 2, "text": "She flew up.", "image_description": "girl flying", "emotion": "joy"},
            {"page_number": 1, "text": "Mia looked up.", "image_description": "girl at window"}
        ]
    }"#;

    #[test]
    fn test_parse_sorts_pages() {
        let script = StoryScript::from_llm_json(SCRIPT).unwrap();
        assert_eq!(script.title, "Mia and the Moon");
        assert_eq!(script.pages[0].page_number, 1);
        assert_eq!(script.pages[1].emotion.as_deref(), Some("joy"));
    }

    #[test]
    fn test_parse_strips_code_fence() {
        let fenced = format!("```json\n{}\n```", SCRIPT);
        assert_eq!(StoryScript::from_llm_json(&fenced).unwrap().page_count(), 2);
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        assert!(matches!(
            StoryScript::from_llm_json("{\"title\": "),
            Err(ScriptError::Malformed(_))
        ));
    }

    #[test]
    fn test_validate_rules() {
        let empty = StoryScript {
            title: "t".into(),
            pages: vec![],
        };
        assert_eq!(empty.validate(), Err(ScriptError::Empty));

        let page = |n: u32| ScriptPage {
            page_number: n,
            text: "words".into(),
            image_description: "scene".into(),
            emotion: None,
        };
        let dup = StoryScript {
            title: "t".into(),
            pages: vec![page(1), page(1)],
        };
        assert_eq!(dup.validate(), Err(ScriptError::DuplicatePageNumber(1)));

        let zero = StoryScript {
            title: "t".into(),
            pages: vec![page(0)],
        };
        assert_eq!(zero.validate(), Err(ScriptError::InvalidPageNumber(0)));
    }
}
