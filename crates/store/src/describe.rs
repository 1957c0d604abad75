use crate::Result;
use recall_sampling::{budgets, tags, PromptBuilder, SampleRequest, Sampler};
use std::sync::Arc;

/// Asks the model for a one-paragraph description of a category's content.
#[derive(Clone)]
pub struct Describer {
    sampler: Arc<dyn Sampler>,
    prompts: Arc<PromptBuilder>,
}

impl Describer {
    pub fn new(sampler: Arc<dyn Sampler>, prompts: Arc<PromptBuilder>) -> Self {
        Self { sampler, prompts }
    }

    pub async fn describe(&self, category_name: &str, content: &str) -> Result<String> {
        let prompt = self.prompts.category_description(category_name, content).await;
        let response = self
            .sampler
            .sample(SampleRequest::new(prompt, budgets::DESCRIPTION))
            .await?;
        Ok(tags::DESCRIPTION.require(&response)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use recall_sampling::SamplingError;

    struct Fixed(&'static str);

    #[async_trait]
    impl Sampler for Fixed {
        async fn sample(&self, request: SampleRequest) -> recall_sampling::Result<String> {
            assert_eq!(request.max_tokens, budgets::DESCRIPTION);
            Ok(self.0.to_string())
        }
    }

    fn describer(response: &'static str) -> Describer {
        Describer::new(
            Arc::new(Fixed(response)),
            Arc::new(PromptBuilder::new(None, "user")),
        )
    }

    #[tokio::test]
    async fn extracts_description_tag() {
        let text = describer("ok <DESCRIPTION> Rust notes </DESCRIPTION>")
            .describe("lang/rust", "content")
            .await
            .unwrap();
        assert_eq!(text, "Rust notes");
    }

    #[tokio::test]
    async fn missing_tag_is_an_error() {
        let err = describer("no tag").describe("a", "b").await.unwrap_err();
        assert!(matches!(
            err,
            crate::StoreError::Sampling(SamplingError::MissingTag("DESCRIPTION"))
        ));
    }
}
