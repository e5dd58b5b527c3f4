//! Turns fetched responses into stored documents.

use crate::document::{collection_for, domain_of, Document, IndexAck};
use crate::fetch::FetchRequest;
use crate::normalizer::{FetchedPage, NormalizeError, Normalizer};
use crate::scoring;
use crate::store::{DocumentStore, StoreError};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What happened to one fetched response.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexOutcome {
    /// The page was stored.
    Indexed(IndexAck),
    /// The page was not indexable; nothing was written.
    Skipped(NormalizeError),
    /// The response redirected; the follow-up must be fetched next.
    Redirect(FetchRequest),
}

/// Normalize → score → upsert pipeline shared by every crawl job.
#[derive(Clone)]
pub struct DocumentIndexer {
    normalizer: Normalizer,
    store: Arc<dyn DocumentStore>,
}

impl DocumentIndexer {
    /// Creates an indexer writing to `store`.
    pub fn new(normalizer: Normalizer, store: Arc<dyn DocumentStore>) -> Self {
        Self { normalizer, store }
    }

    /// Indexes one response fetched for `request`.
    ///
    /// Allow-listed redirects are never indexed: with a `Location` they
    /// produce a follow-up request, without one they are skipped. Store
    /// failures are returned.
    pub async fn index_response(
        &self,
        request: &FetchRequest,
        page: &FetchedPage,
    ) -> Result<IndexOutcome, StoreError> {
        if request.is_redirect_status(page.status) {
            let target = page.location().and_then(|location| page.url.join(&location).ok());
            return Ok(match target {
                Some(target) => {
                    tracing::debug!(from = %page.url, to = %target, status = page.status, "redirect");
                    IndexOutcome::Redirect(request.redirect_to(target))
                }
                None => {
                    tracing::warn!(url = %page.url, status = page.status, "redirect without usable location");
                    IndexOutcome::Skipped(NormalizeError::NotIndexable(format!(
                        "{} redirect without location",
                        page.status
                    )))
                }
            });
        }

        let normalized = match self.normalizer.normalize(page) {
            Ok(normalized) => normalized,
            Err(reason) => {
                tracing::warn!(url = %page.url, %reason, "page skipped");
                return Ok(IndexOutcome::Skipped(reason));
            }
        };

        let weight = scoring::score(
            &normalized.title,
            &normalized.description,
            &normalized.body,
            &normalized.boilerplate,
        );
        let document = Document {
            url: page.url.to_string(),
            domain: domain_of(&page.url),
            title: normalized.title,
            description: normalized.description,
            body: normalized.body,
            weight,
            thumbnail: None,
            vectors: BTreeMap::new(),
        };
        let collection = collection_for(&normalized.language);
        let ack = self.store.upsert_document(&collection, &document).await?;
        tracing::debug!(url = %document.url, %collection, weight, replaced = ack.replaced, "indexed");
        Ok(IndexOutcome::Indexed(ack))
    }
}
