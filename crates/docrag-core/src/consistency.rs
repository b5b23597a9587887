//! Keeps a user's document collection and vector indices aligned.
//!
//! The two stores fail independently and there is no distributed
//! transaction. [`ConsistencyCoordinator::ensure`] checks both and creates
//! whatever is missing, so a crash between the two creation calls leaves
//! an asymmetric state that the next call repairs.
//!
//! | doc-store | vector index | action |
//! |-----------|--------------|--------|
//! | no        | no           | create both |
//! | yes       | no           | create index (warn) |
//! | no        | yes          | create collection (warn) |
//! | yes       | yes          | no-op |
//!
//! Two requests racing on a brand-new user may both decide to create;
//! every create call is idempotent at the store level.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::naming::{normalize_user_id, CollectionNaming};
use crate::store::{DocumentStore, ImageIndex, VectorIndex};

/// Physical names for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHandles {
    pub user_id: String,
    pub collection: String,
    pub text_index: String,
    pub image_index: String,
}

/// Which of the four existence states `ensure` found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionState {
    Created,
    RepairedVectorIndex,
    RepairedDocumentCollection,
    Existing,
}

pub struct ConsistencyCoordinator {
    docs: Arc<dyn DocumentStore>,
    index: Arc<dyn VectorIndex>,
    images: Option<Arc<dyn ImageIndex>>,
    naming: CollectionNaming,
}

impl ConsistencyCoordinator {
    pub fn new(
        docs: Arc<dyn DocumentStore>,
        index: Arc<dyn VectorIndex>,
        naming: CollectionNaming,
    ) -> Self {
        Self {
            docs,
            index,
            images: None,
            naming,
        }
    }

    /// Also ensure the per-user image index.
    pub fn with_image_index(mut self, images: Arc<dyn ImageIndex>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn naming(&self) -> &CollectionNaming {
        &self.naming
    }

    /// Derive names without touching either store.
    pub fn names(&self, user_id: &str) -> CollectionHandles {
        let user = normalize_user_id(user_id);
        CollectionHandles {
            collection: self.naming.collection(&user),
            text_index: self.naming.text_index(&user),
            image_index: self.naming.image_index(&user),
            user_id: user,
        }
    }

    /// Guarantee both projections exist for `user_id`.
    pub async fn ensure(&self, user_id: &str) -> Result<(CollectionHandles, CollectionState)> {
        let handles = self.names(user_id);
        let doc_exists = self.docs.collection_exists(&handles.collection).await?;
        let index_exists = self.index.index_exists(&handles.text_index).await?;

        let state = match (doc_exists, index_exists) {
            (false, false) => {
                info!(user = %handles.user_id, collection = %handles.collection, "creating collection and vector index");
                self.docs.get_or_create_collection(&handles.collection).await?;
                self.index.ensure_index(&handles.text_index, false).await?;
                CollectionState::Created
            }
            (true, false) => {
                warn!(
                    user = %handles.user_id,
                    index = %handles.text_index,
                    "document collection exists without vector index; creating index"
                );
                self.index.ensure_index(&handles.text_index, false).await?;
                CollectionState::RepairedVectorIndex
            }
            (false, true) => {
                warn!(
                    user = %handles.user_id,
                    collection = %handles.collection,
                    "vector index exists without document collection; creating collection"
                );
                self.docs.get_or_create_collection(&handles.collection).await?;
                CollectionState::RepairedDocumentCollection
            }
            (true, true) => {
                debug!(user = %handles.user_id, "collection and vector index already exist");
                CollectionState::Existing
            }
        };

        if let Some(images) = &self.images {
            if !images.index_exists(&handles.image_index).await? {
                images.ensure_index(&handles.image_index).await?;
            }
        }

        Ok((handles, state))
    }
}
