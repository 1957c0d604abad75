//! # Recall Query
//!
//! The two pipelines that sit on top of the store.
//!
//! **Query**: classify the query against the summary, ask each matching category on its own,
//! follow the references they make until no new category turns up, then merge.
//!
//! ```text
//! query ──> classify ──> FanOut ──┬─> category A ──ref──> category C ──┐
//!                                 └─> category B ──────────────────────┴─> merge ──> answer
//! ```
//!
//! **Ingest**: classify the information (new categories allowed), then rewrite every chosen
//! category concurrently and hand each result to the version cache.

mod classify;
mod error;
mod fanout;
mod ingest;
mod memory;
mod query;

pub use classify::parse_categories;
pub use error::{QueryError, Result};
pub use fanout::{CategoryAnswer, CategoryQuerier, FanOut, QueryCategory};
pub use ingest::{IngestFailure, IngestReport};
pub use memory::{Memory, NO_MEMORY_RESPONSE};
