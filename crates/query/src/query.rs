use crate::{
    parse_categories, CategoryAnswer, CategoryQuerier, FanOut, Memory, QueryCategory, Result,
    NO_MEMORY_RESPONSE,
};
use async_trait::async_trait;
use recall_sampling::{
    budgets, tags, PromptBuilder, SampleRequest, Sampler, SamplingError,
    SingleCategoryAnswerPrompt,
};
use recall_store::{category_file_path, has_stored_categories, render_summary, MemoryConfig};
use std::io::ErrorKind;
use std::sync::Arc;

impl Memory {
    /// Answers `query` from memory.
    ///
    /// An empty ledger answers with [`NO_MEMORY_RESPONSE`] without calling the model.
    /// Otherwise the model picks existing categories, each is asked separately (following
    /// any references it makes), and several partial answers are merged by one more call.
    pub async fn query_memory(&self, query: &str) -> Result<String> {
        let versions = self.cache.snapshot().await?;
        if !has_stored_categories(&versions) {
            log::info!("Memory is empty; skipping query");
            return Ok(NO_MEMORY_RESPONSE.to_string());
        }

        let summary = render_summary(&versions);
        let prompt = self.prompts.classify(&summary, query, false).await;
        let response = self
            .sampler
            .sample(SampleRequest::new(prompt, budgets::CLASSIFY))
            .await?;
        let categories = parse_categories(&self.config, &tags::CATEGORY, &response, true).await?;
        if categories.is_empty() {
            log::info!("No category matched the query");
            return Ok(NO_MEMORY_RESPONSE.to_string());
        }

        let querier = Arc::new(MemoryQuerier {
            config: self.config.clone(),
            sampler: self.sampler.clone(),
            prompts: self.prompts.clone(),
            query: query.to_string(),
        });
        let mut fanout = FanOut::new(querier);
        for category in categories {
            fanout.add_category(category);
        }
        let answers = fanout.join().await?;
        log::info!("Query answered from {} categories", answers.len());

        match answers.len() {
            0 => Ok(NO_MEMORY_RESPONSE.to_string()),
            1 => Ok(answers.into_values().next().unwrap_or_default()),
            _ => {
                let prompt = self.prompts.summarize(query, &answers).await;
                let response = self
                    .sampler
                    .sample(SampleRequest::new(prompt, budgets::SUMMARIZE))
                    .await?;
                Ok(tags::ANSWER.require(&response)?)
            }
        }
    }
}

struct MemoryQuerier {
    config: MemoryConfig,
    sampler: Arc<dyn Sampler>,
    prompts: Arc<PromptBuilder>,
    query: String,
}

#[async_trait]
impl CategoryQuerier for MemoryQuerier {
    async fn query_category(&self, category: QueryCategory) -> Result<CategoryAnswer> {
        let path = category_file_path(&self.config, &category.category_name)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };

        let prompt = self
            .prompts
            .single_category_answer(SingleCategoryAnswerPrompt {
                query: &self.query,
                category_name: &category.category_name,
                reason: &category.reason,
                content: &content,
            })
            .await;
        let response = self
            .sampler
            .sample(SampleRequest::new(prompt, budgets::CATEGORY_ANSWER))
            .await?;

        let references =
            parse_categories(&self.config, &tags::CATEGORY_REFERENCE, &response, true).await?;
        let answer = match tags::ANSWER.match_one(&response) {
            Some(answer) => Some(answer),
            None if tags::SKIP.is_match(&response) => None,
            None => return Err(SamplingError::MissingTag(tags::ANSWER.name()).into()),
        };
        log::debug!(
            "{}: {} ({} references)",
            category.category_name,
            if answer.is_some() { "answered" } else { "skipped" },
            references.len()
        );
        Ok(CategoryAnswer { answer, references })
    }
}
