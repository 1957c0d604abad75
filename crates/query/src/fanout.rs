use crate::{QueryError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;

/// A category to consult, with the reason it was picked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryCategory {
    pub category_name: String,
    pub reason: String,
}

/// What one category contributed to a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryAnswer {
    /// `None` when the category had nothing relevant.
    pub answer: Option<String>,
    /// Other categories this one points at.
    pub references: Vec<QueryCategory>,
}

/// Answers a query from a single category.
#[async_trait]
pub trait CategoryQuerier: Send + Sync + 'static {
    async fn query_category(&self, category: QueryCategory) -> Result<CategoryAnswer>;
}

/// Walks the category reference graph to a fixpoint, one task per category.
///
/// A category is registered before its task is spawned and is never spawned twice, so
/// cycles terminate and [`join`](FanOut::join) cannot finish while work is outstanding.
/// The first failing task fails the join; tasks still running are detached and their
/// results dropped.
pub struct FanOut<Q> {
    querier: Arc<Q>,
    registered: HashSet<String>,
    completed: usize,
    tasks: JoinSet<(String, Result<CategoryAnswer>)>,
    answers: BTreeMap<String, String>,
}

impl<Q: CategoryQuerier> FanOut<Q> {
    pub fn new(querier: Arc<Q>) -> Self {
        Self {
            querier,
            registered: HashSet::new(),
            completed: 0,
            tasks: JoinSet::new(),
            answers: BTreeMap::new(),
        }
    }

    /// Schedules `category` unless it was already registered. Returns whether it was new.
    pub fn add_category(&mut self, category: QueryCategory) -> bool {
        if !self.registered.insert(category.category_name.clone()) {
            return false;
        }
        log::debug!(
            "Querying category {} ({} registered)",
            category.category_name,
            self.registered.len()
        );
        let querier = self.querier.clone();
        self.tasks.spawn(async move {
            let name = category.category_name.clone();
            let outcome = querier.query_category(category).await;
            (name, outcome)
        });
        true
    }

    pub fn registered(&self) -> usize {
        self.registered.len()
    }

    /// Waits until every registered category, including ones discovered along the way, has
    /// answered. Returns the answers keyed by category name.
    pub async fn join(mut self) -> Result<BTreeMap<String, String>> {
        while let Some(joined) = self.tasks.join_next().await {
            let (name, outcome) = match joined {
                Ok(done) => done,
                Err(err) => {
                    self.tasks.detach_all();
                    return Err(QueryError::Task(err.to_string()));
                }
            };
            self.completed += 1;

            match outcome {
                Ok(answer) => {
                    if let Some(text) = answer.answer {
                        self.answers.insert(name, text);
                    }
                    for reference in answer.references {
                        self.add_category(reference);
                    }
                }
                Err(err) => {
                    log::warn!("Category {name} failed; abandoning query: {err}");
                    self.tasks.detach_all();
                    return Err(err);
                }
            }
        }

        debug_assert_eq!(self.completed, self.registered.len());
        log::debug!(
            "Fan-out finished: {} categories queried, {} answered",
            self.completed,
            self.answers.len()
        );
        Ok(self.answers)
    }
}
