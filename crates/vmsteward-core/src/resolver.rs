// ── Name → handle resolution ──
//
// Inventory scans are slow, so every handle found is cached by display
// name for the lifetime of the connection. Entries are never evicted: a
// VM renamed or deleted behind our back keeps resolving to its old handle.

use dashmap::DashMap;
use tracing::debug;

use vmsteward_api::{EntityKind, EntityRef, FoundEntity};

use crate::connection::Connection;
use crate::error::CoreError;

/// Connection-scoped cache of resolved entity handles, keyed by name.
#[derive(Debug, Default)]
pub struct EntityCache {
    by_name: DashMap<String, EntityRef>,
}

impl EntityCache {
    pub fn get(&self, name: &str) -> Option<EntityRef> {
        self.by_name.get(name).map(|r| r.value().clone())
    }

    pub fn insert(&self, name: impl Into<String>, entity: EntityRef) {
        self.by_name.insert(name.into(), entity);
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl Connection {
    /// Resolve `name` to a handle of `kind`, scanning the inventory on a
    /// cache miss.
    pub async fn resolve(&self, kind: EntityKind, name: &str) -> Result<EntityRef, CoreError> {
        if let Some(cached) = self.cache.get(name) {
            if cached.kind == kind {
                return Ok(cached);
            }
            return Err(CoreError::KindMismatch {
                name: name.into(),
                requested: kind,
                cached: cached.kind,
            });
        }

        debug!(%kind, name, "cache miss, scanning inventory");
        let found = self.call(|p| async move { p.find_entities(kind).await }).await?;

        let entity = found
            .into_iter()
            .find(|e| e.name == name)
            .map(|e| e.entity)
            .ok_or_else(|| CoreError::ObjectNotFound {
                kind: kind.to_string(),
                name: name.into(),
            })?;

        self.cache.insert(name, entity.clone());
        Ok(entity)
    }

    /// Look a VM up by BIOS UUID, bypassing the name cache. The fresh
    /// handle replaces any cached one under its display name.
    pub async fn resolve_by_uuid(&self, uuid: &str) -> Result<FoundEntity, CoreError> {
        let found = self
            .call(|p| async move { p.find_vm_by_uuid(uuid).await })
            .await?
            .ok_or_else(|| CoreError::ObjectNotFound {
                kind: "VM with UUID".into(),
                name: uuid.into(),
            })?;

        debug!(uuid, vm = %found.name, handle = %found.entity, "resolved VM by UUID");
        self.cache.insert(found.name.clone(), found.entity.clone());
        Ok(found)
    }

    pub async fn vm(&self, name: &str) -> Result<EntityRef, CoreError> {
        self.resolve(EntityKind::VirtualMachine, name).await
    }

    pub async fn host(&self, name: &str) -> Result<EntityRef, CoreError> {
        self.resolve(EntityKind::HostSystem, name).await
    }

    pub async fn datastore(&self, name: &str) -> Result<EntityRef, CoreError> {
        self.resolve(EntityKind::Datastore, name).await
    }

    pub async fn folder(&self, name: &str) -> Result<EntityRef, CoreError> {
        self.resolve(EntityKind::Folder, name).await
    }

    pub async fn network(&self, name: &str) -> Result<EntityRef, CoreError> {
        self.resolve(EntityKind::Network, name).await
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use secrecy::SecretString;
    use vmsteward_api::fake::{Call, FakeConnector, FakeControlPlane};

    use super::*;
    use crate::config::ConnectionConfig;

    async fn connect(plane: &FakeControlPlane) -> Connection {
        let config =
            ConnectionConfig::new("vcenter.lab", "svc", SecretString::from("pw".to_string()));
        Connection::connect(Arc::new(FakeConnector::new(plane.clone())), &config)
            .await
            .unwrap()
    }

    fn scans(plane: &FakeControlPlane) -> usize {
        plane.count(|c| matches!(c, Call::FindEntities(_)))
    }

    #[tokio::test]
    async fn second_resolve_is_served_from_cache() {
        let plane = FakeControlPlane::new();
        plane.add_vm("db-01", "vm-7");
        let expected = plane.add_vm("web-01", "vm-9");
        let conn = connect(&plane).await;

        let first = conn.vm("web-01").await.unwrap();
        let second = conn.vm("web-01").await.unwrap();

        assert_eq!(first, expected);
        assert_eq!(second, expected);
        assert_eq!(scans(&plane), 1);
    }

    #[tokio::test]
    async fn cached_name_under_other_kind_is_kind_mismatch() {
        let plane = FakeControlPlane::new();
        plane.add_entity(EntityKind::Folder, "builds", "group-v3");
        let conn = connect(&plane).await;

        conn.folder("builds").await.unwrap();
        let err = conn.vm("builds").await.unwrap_err();

        match err {
            CoreError::KindMismatch {
                name,
                requested,
                cached,
            } => {
                assert_eq!(name, "builds");
                assert_eq!(requested, EntityKind::VirtualMachine);
                assert_eq!(cached, EntityKind::Folder);
            }
            other => panic!("expected KindMismatch, got {other:?}"),
        }
        assert_eq!(scans(&plane), 1);
    }

    #[tokio::test]
    async fn unknown_name_is_object_not_found_and_not_cached() {
        let plane = FakeControlPlane::new();
        let conn = connect(&plane).await;

        let err = conn.host("esx-99").await.unwrap_err();

        assert!(matches!(err, CoreError::ObjectNotFound { .. }));
        assert!(conn.cache().is_empty());
    }

    #[tokio::test]
    async fn uuid_lookup_bypasses_and_refreshes_cache() {
        let plane = FakeControlPlane::new();
        let stale = plane.add_vm("web-01", "vm-1");
        let fresh = plane.add_hidden_vm("vm-1-fresh", "uuid-vm-1");
        plane.set_uuid_target("uuid-vm-1", "web-01", &fresh);
        let conn = connect(&plane).await;

        assert_eq!(conn.vm("web-01").await.unwrap(), stale);
        let found = conn.resolve_by_uuid("uuid-vm-1").await.unwrap();

        assert_eq!(found.entity, fresh);
        assert_eq!(conn.vm("web-01").await.unwrap(), fresh);
        assert_eq!(scans(&plane), 1);
    }

    #[tokio::test]
    async fn unknown_uuid_is_object_not_found() {
        let plane = FakeControlPlane::new();
        let conn = connect(&plane).await;

        let err = conn.resolve_by_uuid("nope").await.unwrap_err();

        assert!(matches!(err, CoreError::ObjectNotFound { .. }));
    }
}
