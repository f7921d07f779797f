use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::compactor;
use crate::engine::{ConflictPolicy, Engine};
use crate::limits::*;

/// Manages per-tenant engines. Each tenant gets its own Engine + WAL + compactor.
/// Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    policy: ConflictPolicy,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, policy: ConflictPolicy) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            policy,
        }
    }

    /// Get or lazily create an engine for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }

        // Only [A-Za-z0-9_-] reaches the file system.
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // The entry guard serializes creation of the same tenant, so two
        // connections can never open the same WAL twice.
        let entry = match self.engines.entry(tenant.to_string()) {
            dashmap::Entry::Occupied(existing) => return Ok(existing.get().clone()),
            dashmap::Entry::Vacant(vacant) => vacant,
        };

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let engine = Arc::new(Engine::new(wal_path, self.policy)?);
        tracing::info!("opened tenant {safe_name}");

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        entry.insert(engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }

    pub fn tenant_count(&self) -> usize {
        self.engines.len()
    }
}
