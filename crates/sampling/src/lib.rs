//! # Recall Sampling
//!
//! Everything the memory engine needs to talk to a language model:
//!
//! - [`Sampler`]: the async seam over whatever transport produces completions
//! - [`RateLimitedSampler`]: bounds in-flight calls and spaces out dispatches
//! - [`tags`]: extraction of `<TAG>…</TAG>` fields from free-form responses
//! - [`PromptBuilder`]: the prompts for description, classification, answer, merge and update
//!
//! ```no_run
//! use recall_sampling::{tags, SampleRequest, Sampler};
//!
//! async fn describe(sampler: &dyn Sampler, prompt: String) -> recall_sampling::Result<String> {
//!     let response = sampler.sample(SampleRequest::new(prompt, 2_000)).await?;
//!     tags::DESCRIPTION.require(&response)
//! }
//! ```

mod error;
mod limiter;
mod prompts;
mod sampler;
pub mod tags;

pub use error::{Result, SamplingError};
pub use limiter::{RateLimitedSampler, SamplingLimits};
pub use prompts::{
    PromptBuilder, SingleCategoryAnswerPrompt, SingleCategoryUpdatePrompt, CONTEXT_REFRESH_INTERVAL,
};
pub use sampler::{budgets, SampleRequest, Sampler};
pub use tags::{CategoryBlock, Tag};
