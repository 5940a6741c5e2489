use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::compactor;
use crate::config::EngineConfig;
use crate::engine::SchedulingService;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::store::MemoryStore;

pub type TenantService = SchedulingService<MemoryStore>;

/// Per-tenant scheduling services, each with its own journal and compactor.
pub struct TenantManager {
    services: DashMap<String, Arc<TenantService>>,
    config: EngineConfig,
}

/// Keep `[A-Za-z0-9_-]` so a tenant name can never escape the data directory.
fn sanitize(tenant: &str) -> String {
    tenant
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

impl TenantManager {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            services: DashMap::new(),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Get or lazily open the service for `tenant`.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<TenantService>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        let name = sanitize(tenant);
        if name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }
        if let Some(service) = self.services.get(&name) {
            return Ok(service.value().clone());
        }

        if self.services.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        let service = match self.services.entry(name.clone()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                std::fs::create_dir_all(&self.config.data_dir)?;
                let path: PathBuf = self.config.data_dir.join(format!("{name}.journal"));
                let store = Arc::new(MemoryStore::open(&path).map_err(std::io::Error::other)?);
                let service = Arc::new(SchedulingService::new(
                    store.clone(),
                    Arc::new(NotifyHub::new()),
                    &self.config,
                ));
                let threshold = self.config.compact_threshold;
                tokio::spawn(async move {
                    compactor::run_compactor(store, threshold).await;
                });
                info!("tenant {name} opened at {}", path.display());
                slot.insert(service.clone());
                service
            }
        };
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.services.len() as f64);
        Ok(service)
    }
}
