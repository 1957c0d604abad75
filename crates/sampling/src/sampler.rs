use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Token budgets for each kind of request the engine makes.
pub mod budgets {
    pub const DESCRIPTION: u32 = 2_000;
    pub const CLASSIFY: u32 = 5_000;
    pub const CATEGORY_ANSWER: u32 = 5_000;
    pub const CATEGORY_UPDATE: u32 = 50_000;
    pub const SUMMARIZE: u32 = 50_000;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRequest {
    pub prompt: String,
    pub max_tokens: u32,
}

impl SampleRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens,
        }
    }
}

/// Produces free-form text completions for a single user prompt.
#[async_trait]
pub trait Sampler: Send + Sync {
    async fn sample(&self, request: SampleRequest) -> Result<String>;
}

#[async_trait]
impl<S: Sampler + ?Sized> Sampler for Arc<S> {
    async fn sample(&self, request: SampleRequest) -> Result<String> {
        (**self).sample(request).await
    }
}
