//! Persistence sink: writes new drafts, one at a time, tolerating item failures.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use obituary_shared::{ObituaryDraft, Result};
use obituary_storage::ContentStore;

/// What happened to a batch of writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistOutcome {
    /// Ids of drafts written, in input order.
    pub created_ids: Vec<String>,
    /// `(index into the input, error message)` for each failed write.
    pub failed: Vec<(usize, String)>,
}

#[derive(Clone)]
pub struct PersistenceSink {
    store: Arc<dyn ContentStore>,
}

impl PersistenceSink {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    /// Write every draft with `create_or_replace`.
    ///
    /// An unreachable store fails the whole batch before any write; a failed
    /// individual write is recorded and the batch continues.
    #[instrument(skip_all, fields(count = drafts.len()))]
    pub async fn persist(&self, drafts: &[ObituaryDraft]) -> Result<PersistOutcome> {
        if drafts.is_empty() {
            return Ok(PersistOutcome::default());
        }

        self.store.ping().await?;

        let mut outcome = PersistOutcome::default();
        for (index, draft) in drafts.iter().enumerate() {
            match self.store.create_or_replace(draft).await {
                Ok(id) => outcome.created_ids.push(id),
                Err(e) => {
                    warn!(slug = %draft.slug, error = %e, "failed to persist draft");
                    outcome.failed.push((index, e.to_string()));
                }
            }
        }

        info!(
            created = outcome.created_ids.len(),
            failed = outcome.failed.len(),
            "persistence complete"
        );
        Ok(outcome)
    }
}
