use crate::config::StoreConfig;
use crate::core::Result;
use crate::persist::{BackupNotifier, BootstrapReport, NoopBackupNotifier, Session, Store, bootstrap};
use crate::storage::{CouchDocumentStore, DocumentStore};
use log::info;
use std::sync::Arc;

/// Entry point: a bootstrapped document store plus its configuration.
///
/// The client is shared; every [`store`](Self::store) and
/// [`session`](Self::session) call hands out a fresh unit-of-work scope with
/// its own identity cache.
#[derive(Clone)]
pub struct Database {
    client: Arc<dyn DocumentStore>,
    config: StoreConfig,
    report: BootstrapReport,
}

impl Database {
    /// Connects to the configured CouchDB server and bootstraps the database.
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        info!("connecting to {} database '{}'", config.redacted_url(), config.database);
        let client = CouchDocumentStore::connect(&config).await?;
        Self::open(Arc::new(client), config).await
    }

    /// Bootstraps any document store.
    pub async fn open(client: Arc<dyn DocumentStore>, config: StoreConfig) -> Result<Self> {
        Self::open_with_notifier(client, config, &NoopBackupNotifier).await
    }

    /// Bootstraps any document store, telling `notifier` about schema
    /// version changes.
    pub async fn open_with_notifier(
        client: Arc<dyn DocumentStore>,
        config: StoreConfig,
        notifier: &dyn BackupNotifier,
    ) -> Result<Self> {
        config.validate()?;
        let report = bootstrap(client.as_ref(), &config, notifier).await?;
        if !report.is_noop() {
            info!("bootstrap applied: {:?}", report);
        }
        Ok(Self {
            client,
            config,
            report,
        })
    }

    /// Fresh scope with an empty identity cache.
    pub fn store(&self) -> Store {
        Store::new(self.client.clone(), self.config.retry.clone())
    }

    /// Fresh session over a fresh scope.
    pub fn session(&self) -> Session {
        Session::new(self.store())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<dyn DocumentStore> {
        &self.client
    }

    /// What bootstrap changed when this handle was opened.
    pub fn bootstrap_report(&self) -> &BootstrapReport {
        &self.report
    }
}
