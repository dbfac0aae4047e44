//! Batch operation outcomes.

use std::fmt;

use cardsafe_common::Error;

/// Outcome of deleting one item of a batch.
#[derive(Debug)]
pub enum DeleteOutcome {
    /// The item existed and is gone now.
    Deleted,
    /// The item was already gone.
    NotFound,
    /// The delete failed; the item may still exist.
    Failed(Error),
}

impl DeleteOutcome {
    /// Classify the result of a single delete call.
    pub fn from_result(result: cardsafe_common::Result<()>) -> Self {
        match result {
            Ok(()) => DeleteOutcome::Deleted,
            Err(Error::NotFound(_)) => DeleteOutcome::NotFound,
            Err(e) => DeleteOutcome::Failed(e),
        }
    }

    /// True unless the delete failed.
    ///
    /// An already missing item counts as settled.
    pub fn is_settled(&self) -> bool {
        !matches!(self, DeleteOutcome::Failed(_))
    }
}

impl fmt::Display for DeleteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteOutcome::Deleted => write!(f, "deleted"),
            DeleteOutcome::NotFound => write!(f, "not found"),
            DeleteOutcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// Per-item outcomes of a batch, in request order.
#[derive(Debug)]
pub struct BatchReport<K> {
    pub outcomes: Vec<(K, DeleteOutcome)>,
}

impl<K> BatchReport<K> {
    /// Create a report from collected outcomes.
    pub fn new(outcomes: Vec<(K, DeleteOutcome)>) -> Self {
        Self { outcomes }
    }

    /// Number of items actually deleted.
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, DeleteOutcome::Deleted))
    }

    /// Number of items that were already gone.
    pub fn not_found(&self) -> usize {
        self.count(|o| matches!(o, DeleteOutcome::NotFound))
    }

    /// Number of items whose delete failed.
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, DeleteOutcome::Failed(_)))
    }

    /// True when no item failed.
    pub fn is_complete(&self) -> bool {
        self.failed() == 0
    }

    /// Outcome recorded for `key`.
    pub fn outcome(&self, key: &K) -> Option<&DeleteOutcome>
    where
        K: PartialEq,
    {
        self.outcomes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, outcome)| outcome)
    }

    /// Iterate over the items whose delete failed.
    pub fn failures(&self) -> impl Iterator<Item = (&K, &Error)> {
        self.outcomes.iter().filter_map(|(k, o)| match o {
            DeleteOutcome::Failed(e) => Some((k, e)),
            _ => None,
        })
    }

    fn count(&self, pred: impl Fn(&DeleteOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

impl<K> Default for BatchReport<K> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
