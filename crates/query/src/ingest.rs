use crate::{parse_categories, Memory, QueryCategory, QueryError, Result};
use futures::future::join_all;
use recall_sampling::{budgets, tags, SampleRequest, SingleCategoryUpdatePrompt};
use serde::Serialize;

/// Per-category outcome of one ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub updated: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<IngestFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestFailure {
    pub category: String,
    pub error: String,
}

impl IngestReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

enum CategoryUpdate {
    Updated,
    Skipped,
}

impl Memory {
    /// Files `information` into one or more categories.
    ///
    /// The model first picks the categories (new ones allowed), then rewrites each one.
    /// Categories are updated concurrently and fail independently; updates to the same
    /// category from overlapping ingestions are serialized.
    pub async fn ingest_memory(&self, information: &str) -> Result<IngestReport> {
        let summary = self.cache.summary().await?;
        let prompt = self.prompts.classify(&summary, information, true).await;
        let response = self
            .sampler
            .sample(SampleRequest::new(prompt, budgets::CLASSIFY))
            .await?;
        let categories = parse_categories(&self.config, &tags::CATEGORY, &response, false).await?;
        if categories.is_empty() {
            return Err(QueryError::NoCategories);
        }
        log::info!(
            "Ingesting into {}",
            categories
                .iter()
                .map(|c| c.category_name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let summary = summary.as_str();
        let updates = categories.into_iter().map(|category| async move {
            let outcome = self.update_category(&category, summary, information).await;
            (category.category_name, outcome)
        });

        let mut report = IngestReport::default();
        for (category, outcome) in join_all(updates).await {
            match outcome {
                Ok(CategoryUpdate::Updated) => report.updated.push(category),
                Ok(CategoryUpdate::Skipped) => {
                    log::info!("Model skipped {category}");
                    report.skipped.push(category);
                }
                Err(err) => {
                    log::error!("Failed to update {category}: {err}");
                    report.failed.push(IngestFailure {
                        category,
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    async fn update_category(
        &self,
        category: &QueryCategory,
        summary: &str,
        information: &str,
    ) -> Result<CategoryUpdate> {
        self.update_locks
            .acquire(category.category_name.clone(), || {
                self.rewrite_category(category, summary, information)
            })
            .await?
    }

    async fn rewrite_category(
        &self,
        category: &QueryCategory,
        summary: &str,
        information: &str,
    ) -> Result<CategoryUpdate> {
        let previous = self.get_category(&category.category_name).await?;
        let prompt = self
            .prompts
            .single_category_update(SingleCategoryUpdatePrompt {
                category_name: &category.category_name,
                summary,
                previous_content: previous.as_deref(),
                information,
                reason: &category.reason,
            })
            .await;
        let response = self
            .sampler
            .sample(SampleRequest::new(prompt, budgets::CATEGORY_UPDATE))
            .await?;

        if tags::SKIP.is_match(&response) {
            return Ok(CategoryUpdate::Skipped);
        }
        let content = tags::CATEGORY_CONTENT.require(&response)?;
        self.cache
            .apply_category_write(category.category_name.clone(), content)
            .await?;
        Ok(CategoryUpdate::Updated)
    }
}
