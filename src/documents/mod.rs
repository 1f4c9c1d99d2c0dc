//! Demonstration resource guarded by method-level rules.
//!
//! Documents have an owner; the default rules let owners (and admins) see
//! their own documents, and only admins delete.

mod service;
mod store;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::policy::AuthorizationRule;
pub use service::DocumentService;
pub use store::DocumentStore;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Document {
    pub id: Uuid,
    pub owner: String,
    pub title: String,
    pub classification: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub owner: String,
    pub title: String,
    #[serde(default = "default_classification")]
    pub classification: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentUpdate {
    pub title: Option<String>,
    pub classification: Option<String>,
}

fn default_classification() -> String {
    "internal".to_string()
}

/// Rules guarding each document operation.
#[derive(Clone, Debug, Deserialize)]
pub struct OperationRules {
    /// Post-filter over the listed documents (`element`).
    #[serde(default = "OperationRules::default_list_documents")]
    pub list_documents: AuthorizationRule,
    /// Post-authorize over the fetched document (`returned`).
    #[serde(default = "OperationRules::default_get_document")]
    pub get_document: AuthorizationRule,
    /// Pre-filter over the submitted documents (`element`).
    #[serde(default = "OperationRules::default_create_documents")]
    pub create_documents: AuthorizationRule,
    /// Post-authorize over the updated document (`returned`). The update is
    /// already stored when this rule runs.
    #[serde(default = "OperationRules::default_update_document")]
    pub update_document: AuthorizationRule,
    /// Pre-authorize, with the document id as `args.id`.
    #[serde(default = "OperationRules::default_delete_document")]
    pub delete_document: AuthorizationRule,
}

impl OperationRules {
    fn default_list_documents() -> AuthorizationRule {
        AuthorizationRule::Predicate(
            "element.owner == identity.principal || has_role('ADMIN')".to_string(),
        )
    }

    fn default_get_document() -> AuthorizationRule {
        AuthorizationRule::Predicate(
            "returned.owner == identity.principal || has_role('ADMIN')".to_string(),
        )
    }

    fn default_create_documents() -> AuthorizationRule {
        AuthorizationRule::Predicate("element.owner == identity.principal".to_string())
    }

    fn default_update_document() -> AuthorizationRule {
        AuthorizationRule::Predicate("returned.owner == identity.principal".to_string())
    }

    fn default_delete_document() -> AuthorizationRule {
        AuthorizationRule::RequiresRole("ADMIN".to_string())
    }

    pub fn rules(&self) -> impl Iterator<Item = &AuthorizationRule> {
        [
            &self.list_documents,
            &self.get_document,
            &self.create_documents,
            &self.update_document,
            &self.delete_document,
        ]
        .into_iter()
    }
}

impl Default for OperationRules {
    fn default() -> Self {
        Self {
            list_documents: Self::default_list_documents(),
            get_document: Self::default_get_document(),
            create_documents: Self::default_create_documents(),
            update_document: Self::default_update_document(),
            delete_document: Self::default_delete_document(),
        }
    }
}
