use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Document, DocumentUpdate, NewDocument};

/// In-memory document storage, kept in insertion order.
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: RwLock<Vec<Document>>,
}

fn materialize(document: NewDocument) -> Document {
    Document {
        id: Uuid::new_v4(),
        owner: document.owner,
        title: document.title,
        classification: document.classification,
    }
}

impl DocumentStore {
    pub fn new(seed: &[NewDocument]) -> Self {
        Self {
            documents: RwLock::new(seed.iter().cloned().map(materialize).collect()),
        }
    }

    pub async fn list(&self) -> Vec<Document> {
        self.documents.read().await.clone()
    }

    pub async fn get(&self, id: Uuid) -> Option<Document> {
        let documents = self.documents.read().await;
        documents.iter().find(|document| document.id == id).cloned()
    }

    pub async fn insert_all(&self, new_documents: Vec<NewDocument>) -> Vec<Document> {
        let created: Vec<Document> = new_documents.into_iter().map(materialize).collect();
        self.documents.write().await.extend(created.iter().cloned());
        created
    }

    pub async fn update(&self, id: Uuid, update: DocumentUpdate) -> Option<Document> {
        let mut documents = self.documents.write().await;
        let document = documents.iter_mut().find(|document| document.id == id)?;

        if let Some(title) = update.title {
            document.title = title;
        }
        if let Some(classification) = update.classification {
            document.classification = classification;
        }

        Some(document.clone())
    }

    pub async fn delete(&self, id: Uuid) -> Option<Document> {
        let mut documents = self.documents.write().await;
        let position = documents.iter().position(|document| document.id == id)?;
        Some(documents.remove(position))
    }
}
