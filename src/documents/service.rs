use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use super::{Document, DocumentStore, DocumentUpdate, NewDocument, OperationRules};
use crate::command::server::auth::{Authorizer, MethodGuard};
use crate::command::server::Error;
use crate::identity::Identity;

/// Document operations, each wrapped in its method-level guard.
pub struct DocumentService {
    store: Arc<DocumentStore>,
    authorizer: Arc<Authorizer>,
    rules: OperationRules,
}

impl DocumentService {
    pub fn new(store: Arc<DocumentStore>, authorizer: Arc<Authorizer>, rules: OperationRules) -> Self {
        Self {
            store,
            authorizer,
            rules,
        }
    }

    fn guard<'a>(&'a self, identity: Option<&'a Identity>, operation: &'static str) -> MethodGuard<'a> {
        MethodGuard::new(&self.authorizer, identity, operation)
    }

    #[instrument(skip(self, identity))]
    pub async fn list(&self, identity: Option<&Identity>) -> Result<Vec<Document>, Error> {
        let store = &self.store;

        self.guard(identity, "list_documents")
            .post_filter(&self.rules.list_documents, move || async move {
                Ok(store.list().await)
            })
            .await
    }

    #[instrument(skip(self, identity))]
    pub async fn get(&self, identity: Option<&Identity>, id: Uuid) -> Result<Document, Error> {
        let store = &self.store;

        self.guard(identity, "get_document")
            .with_argument("id", &id)
            .post_authorize(&self.rules.get_document, move || async move {
                store
                    .get(id)
                    .await
                    .ok_or_else(|| Error::NotFound(format!("document {id}")))
            })
            .await
    }

    #[instrument(skip(self, identity, documents), fields(submitted = documents.len()))]
    pub async fn create(
        &self,
        identity: Option<&Identity>,
        documents: Vec<NewDocument>,
    ) -> Result<Vec<Document>, Error> {
        let store = &self.store;

        self.guard(identity, "create_documents")
            .pre_filter(&self.rules.create_documents, documents, move |allowed| async move {
                Ok(store.insert_all(allowed).await)
            })
            .await
    }

    /// The update is applied before its result is authorized, so a denied
    /// caller still modified the document.
    #[instrument(skip(self, identity, update))]
    pub async fn update(
        &self,
        identity: Option<&Identity>,
        id: Uuid,
        update: DocumentUpdate,
    ) -> Result<Document, Error> {
        let store = &self.store;

        self.guard(identity, "update_document")
            .with_argument("id", &id)
            .with_argument("update", &update)
            .post_authorize(&self.rules.update_document, move || async move {
                store
                    .update(id, update)
                    .await
                    .ok_or_else(|| Error::NotFound(format!("document {id}")))
            })
            .await
    }

    #[instrument(skip(self, identity))]
    pub async fn delete(&self, identity: Option<&Identity>, id: Uuid) -> Result<Document, Error> {
        let store = &self.store;

        self.guard(identity, "delete_document")
            .with_argument("id", &id)
            .pre_authorize(&self.rules.delete_document, move || async move {
                store
                    .delete(id)
                    .await
                    .ok_or_else(|| Error::NotFound(format!("document {id}")))
            })
            .await
    }
}
