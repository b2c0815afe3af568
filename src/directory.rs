use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;

/// Where resources live. The engine consumes existence only; naming,
/// capacity, and ownership belong to the calling layer.
#[async_trait]
pub trait ResourceDirectory: Send + Sync {
    /// Whether `id` refers to a known resource. Backend failures map to
    /// `EngineError::Storage`.
    async fn resource_exists(&self, id: Ulid) -> Result<bool, EngineError>;
}

/// Basic resource metadata, the shape an external catalog would hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMeta {
    pub id: Ulid,
    pub name: String,
    pub kind: String,
    pub capacity: u32,
    pub location: Option<String>,
    pub attributes: serde_json::Value,
}

impl ResourceMeta {
    pub fn new(id: Ulid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: String::new(),
            capacity: 1,
            location: None,
            attributes: serde_json::Value::Null,
        }
    }
}

/// In-process directory for embedding and tests.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    resources: DashMap<Ulid, ResourceMeta>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, meta: ResourceMeta) {
        self.resources.insert(meta.id, meta);
    }

    /// Register a resource with defaulted metadata, returning its id.
    pub fn register(&self, name: impl Into<String>) -> Ulid {
        let id = Ulid::new();
        self.insert(ResourceMeta::new(id, name));
        id
    }

    pub fn get(&self, id: Ulid) -> Option<ResourceMeta> {
        self.resources.get(&id).map(|r| r.clone())
    }

    pub fn remove(&self, id: Ulid) -> Option<ResourceMeta> {
        self.resources.remove(&id).map(|(_, meta)| meta)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[async_trait]
impl ResourceDirectory for InMemoryDirectory {
    async fn resource_exists(&self, id: Ulid) -> Result<bool, EngineError> {
        Ok(self.resources.contains_key(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exists_tracks_inserts_and_removals() {
        let dir = InMemoryDirectory::new();
        assert!(!dir.resource_exists(Ulid::new()).await.unwrap());

        let rid = dir.register("Room A");
        assert!(dir.resource_exists(rid).await.unwrap());
        assert_eq!(dir.len(), 1);

        dir.remove(rid);
        assert!(!dir.resource_exists(rid).await.unwrap());
        assert!(dir.is_empty());
    }

    #[tokio::test]
    async fn metadata_roundtrip() {
        let dir = InMemoryDirectory::new();
        let id = Ulid::new();
        let meta = ResourceMeta {
            kind: "meeting_room".into(),
            capacity: 12,
            location: Some("3F".into()),
            attributes: serde_json::json!({"projector": true}),
            ..ResourceMeta::new(id, "Boardroom")
        };
        dir.insert(meta.clone());

        let got = dir.get(id).unwrap();
        assert_eq!(got, meta);
        assert_eq!(got.attributes["projector"], serde_json::json!(true));
        assert!(dir.get(Ulid::new()).is_none());
    }
}
