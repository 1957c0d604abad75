//! Extraction of tagged fields from model output.
//!
//! A tag is `<NAME>content</NAME>`; content may span lines and is trimmed. Tags may repeat
//! (several `<CATEGORY>` blocks in one response), and empty tags are ignored.

use crate::{Result, SamplingError};
use once_cell::sync::Lazy;
use regex::Regex;

pub struct Tag {
    name: &'static str,
    regex: Regex,
}

impl Tag {
    fn new(name: &'static str) -> Self {
        let pattern = format!(r"(?s)<{name}>(.*?)</{name}>");
        Self {
            name,
            regex: Regex::new(&pattern).expect("tag names are literal identifiers"),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Content of the first occurrence, if it is non-empty.
    pub fn match_one(&self, text: &str) -> Option<String> {
        self.regex
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|content| !content.is_empty())
    }

    /// Like [`match_one`](Self::match_one) but a missing tag is an error.
    pub fn require(&self, text: &str) -> Result<String> {
        self.match_one(text)
            .ok_or(SamplingError::MissingTag(self.name))
    }

    /// True when the tag appears at all, even empty.
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Every non-empty occurrence, in order.
    pub fn match_all(&self, text: &str) -> Vec<String> {
        self.regex
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|content| !content.is_empty())
            .collect()
    }
}

pub static ANSWER: Lazy<Tag> = Lazy::new(|| Tag::new("ANSWER"));
pub static SKIP: Lazy<Tag> = Lazy::new(|| Tag::new("SKIP"));
pub static CATEGORY: Lazy<Tag> = Lazy::new(|| Tag::new("CATEGORY"));
pub static CATEGORY_NAME: Lazy<Tag> = Lazy::new(|| Tag::new("CATEGORY_NAME"));
pub static REASON: Lazy<Tag> = Lazy::new(|| Tag::new("WHAT_TO_INCLUDE"));
pub static CATEGORY_CONTENT: Lazy<Tag> = Lazy::new(|| Tag::new("CATEGORY_CONTENT"));
pub static DESCRIPTION: Lazy<Tag> = Lazy::new(|| Tag::new("DESCRIPTION"));
pub static CATEGORY_REFERENCE: Lazy<Tag> = Lazy::new(|| Tag::new("CATEGORY_REFERENCE"));

/// A category proposed by the model, with the reason it was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryBlock {
    pub name: String,
    pub reason: String,
}

/// Parses every `block` tag in `text` into a name/reason pair.
///
/// Each block must contain both `<CATEGORY_NAME>` and `<WHAT_TO_INCLUDE>`; anything else is
/// a malformed response. Name validation is left to the caller, which knows the store.
pub fn category_blocks(block: &Tag, text: &str) -> Result<Vec<CategoryBlock>> {
    block
        .match_all(text)
        .into_iter()
        .map(|content| {
            match (CATEGORY_NAME.match_one(&content), REASON.match_one(&content)) {
                (Some(name), Some(reason)) => Ok(CategoryBlock { name, reason }),
                _ => Err(SamplingError::InvalidCategoryBlock(content)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn match_one_trims_multiline_content() {
        let text = "noise <ANSWER>\n  first line\nsecond line\n</ANSWER> trailing";
        assert_eq!(
            ANSWER.match_one(text).as_deref(),
            Some("first line\nsecond line")
        );
    }

    #[test]
    fn empty_tag_counts_as_present_but_has_no_content() {
        let text = "<SKIP></SKIP>";
        assert!(SKIP.is_match(text));
        assert_eq!(SKIP.match_one(text), None);
    }

    #[test]
    fn require_reports_the_missing_tag() {
        let err = DESCRIPTION.require("nothing here").unwrap_err();
        assert_eq!(err, SamplingError::MissingTag("DESCRIPTION"));
    }

    #[test]
    fn category_tag_does_not_match_longer_tag_names() {
        let text = "<CATEGORY_REFERENCE><CATEGORY_NAME>a</CATEGORY_NAME><WHAT_TO_INCLUDE>r</WHAT_TO_INCLUDE></CATEGORY_REFERENCE>";
        assert!(CATEGORY.match_all(text).is_empty());
        assert_eq!(CATEGORY_REFERENCE.match_all(text).len(), 1);
    }

    #[test]
    fn parses_repeated_category_blocks() {
        let text = r"
<CATEGORY>
  <CATEGORY_NAME>lang/rust</CATEGORY_NAME>
  <WHAT_TO_INCLUDE>ownership notes</WHAT_TO_INCLUDE>
</CATEGORY>
<CATEGORY>
  <CATEGORY_NAME>lang/go</CATEGORY_NAME>
  <WHAT_TO_INCLUDE>goroutine notes</WHAT_TO_INCLUDE>
</CATEGORY>";
        let blocks = category_blocks(&CATEGORY, text).unwrap();
        assert_eq!(
            blocks,
            vec![
                CategoryBlock {
                    name: "lang/rust".to_string(),
                    reason: "ownership notes".to_string(),
                },
                CategoryBlock {
                    name: "lang/go".to_string(),
                    reason: "goroutine notes".to_string(),
                },
            ]
        );
    }

    #[test]
    fn block_without_reason_is_rejected() {
        let text = "<CATEGORY><CATEGORY_NAME>x</CATEGORY_NAME></CATEGORY>";
        assert!(matches!(
            category_blocks(&CATEGORY, text),
            Err(SamplingError::InvalidCategoryBlock(_))
        ));
    }
}
