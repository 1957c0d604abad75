use crate::{QueryCategory, QueryError, Result};
use recall_sampling::tags::{self, Tag};
use recall_store::{category_exists, is_valid_category_name, MemoryConfig};

/// Parses `block` tags from a model response into categories.
///
/// Every name must be path-safe. With `existing_only`, every name must also have a backing
/// file; a reference to anything else fails the whole response.
pub async fn parse_categories(
    config: &MemoryConfig,
    block: &Tag,
    response: &str,
    existing_only: bool,
) -> Result<Vec<QueryCategory>> {
    let mut categories: Vec<QueryCategory> = Vec::new();
    for parsed in tags::category_blocks(block, response)? {
        if !is_valid_category_name(&parsed.name) {
            return Err(QueryError::InvalidCategoryName(parsed.name));
        }
        if existing_only && !category_exists(config, &parsed.name).await {
            return Err(QueryError::UnknownCategory(parsed.name));
        }
        if categories.iter().any(|c| c.category_name == parsed.name) {
            continue;
        }
        categories.push(QueryCategory {
            category_name: parsed.name,
            reason: parsed.reason,
        });
    }
    Ok(categories)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn parses_and_validates_blocks() {
        let tmp = TempDir::new().unwrap();
        let config = MemoryConfig::new(tmp.path(), None).await.unwrap();
        std::fs::write(config.memory_dir.join("api.md"), "x").unwrap();

        let response = "<CATEGORY><CATEGORY_NAME>api</CATEGORY_NAME><WHAT_TO_INCLUDE>routes</WHAT_TO_INCLUDE></CATEGORY>\
                        <CATEGORY><CATEGORY_NAME>user</CATEGORY_NAME><WHAT_TO_INCLUDE>prefs</WHAT_TO_INCLUDE></CATEGORY>\
                        <CATEGORY><CATEGORY_NAME>api</CATEGORY_NAME><WHAT_TO_INCLUDE>dup</WHAT_TO_INCLUDE></CATEGORY>";
        let categories = parse_categories(&config, &tags::CATEGORY, response, true)
            .await
            .unwrap();
        assert_eq!(
            categories,
            vec![
                QueryCategory {
                    category_name: "api".to_string(),
                    reason: "routes".to_string()
                },
                QueryCategory {
                    category_name: "user".to_string(),
                    reason: "prefs".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn rejects_unknown_and_unsafe_names() {
        let tmp = TempDir::new().unwrap();
        let config = MemoryConfig::new(tmp.path(), None).await.unwrap();

        let missing = "<CATEGORY><CATEGORY_NAME>lang/zig</CATEGORY_NAME><WHAT_TO_INCLUDE>x</WHAT_TO_INCLUDE></CATEGORY>";
        assert!(matches!(
            parse_categories(&config, &tags::CATEGORY, missing, true).await,
            Err(QueryError::UnknownCategory(name)) if name == "lang/zig"
        ));
        assert_eq!(
            parse_categories(&config, &tags::CATEGORY, missing, false)
                .await
                .unwrap()
                .len(),
            1
        );

        let escaping = "<CATEGORY><CATEGORY_NAME>../etc</CATEGORY_NAME><WHAT_TO_INCLUDE>x</WHAT_TO_INCLUDE></CATEGORY>";
        assert!(matches!(
            parse_categories(&config, &tags::CATEGORY, escaping, false).await,
            Err(QueryError::InvalidCategoryName(_))
        ));
    }
}
