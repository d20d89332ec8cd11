use super::cluster::Cluster;
use super::network::NetworkHandle;
use super::transaction::MemoryTransaction;
use crate::config::ClientConfig;
use crate::error::FluxResult;
use crate::native::{NativeDatabase, NativeTransaction};
use crate::types::DatabaseOption;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Per-database defaults every new (or reset) transaction starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TransactionDefaults {
    pub(crate) max_watches: usize,
    pub(crate) timeout: Option<Duration>,
    /// `None` retries forever
    pub(crate) retry_limit: Option<u32>,
    pub(crate) max_retry_delay: Duration,
    pub(crate) size_limit: usize,
}

impl TransactionDefaults {
    fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_watches: config.max_watches,
            timeout: config.transaction_timeout(),
            retry_limit: None,
            max_retry_delay: config.max_backoff(),
            size_limit: config.transaction_size_limit,
        }
    }
}

/// State shared by a database handle and the transactions it created.
pub(crate) struct DatabaseShared {
    pub(crate) id: u64,
    pub(crate) cluster: Arc<Cluster>,
    pub(crate) network: NetworkHandle,
    pub(crate) initial_backoff: Duration,
    defaults: Mutex<TransactionDefaults>,
}

impl DatabaseShared {
    pub(crate) fn defaults(&self) -> TransactionDefaults {
        self.defaults.lock().clone()
    }
}

pub(crate) struct MemoryDatabase {
    shared: Arc<DatabaseShared>,
}

impl MemoryDatabase {
    pub(crate) fn new(id: u64, cluster: Arc<Cluster>, network: NetworkHandle, config: &ClientConfig) -> Self {
        Self {
            shared: Arc::new(DatabaseShared {
                id,
                cluster,
                network,
                initial_backoff: config.initial_backoff(),
                defaults: Mutex::new(TransactionDefaults::from_config(config)),
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> Arc<DatabaseShared> {
        Arc::clone(&self.shared)
    }
}

impl NativeDatabase for MemoryDatabase {
    fn create_transaction(&self) -> FluxResult<Box<dyn NativeTransaction>> {
        Ok(Box::new(MemoryTransaction::new(Arc::clone(&self.shared))))
    }

    fn set_option(&self, option: &DatabaseOption) -> FluxResult<()> {
        let mut defaults = self.shared.defaults.lock();
        match *option {
            DatabaseOption::MaxWatches(n) => defaults.max_watches = n as usize,
            DatabaseOption::TransactionTimeout(ms) => {
                defaults.timeout = (ms > 0).then(|| Duration::from_millis(ms as u64));
            }
            DatabaseOption::TransactionRetryLimit(n) => {
                defaults.retry_limit = u32::try_from(n).ok();
            }
            DatabaseOption::TransactionMaxRetryDelay(ms) => {
                defaults.max_retry_delay = Duration::from_millis(ms as u64);
            }
            DatabaseOption::TransactionSizeLimit(n) => defaults.size_limit = n as usize,
            DatabaseOption::LocationCacheSize(_)
            | DatabaseOption::MachineId(_)
            | DatabaseOption::DatacenterId(_) => {
                trace!(code = option.code(), "database option has no effect in memory");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::network::Network;

    fn database() -> MemoryDatabase {
        let network = Network::new();
        MemoryDatabase::new(
            7,
            Arc::new(Cluster::new("test", 1_000)),
            network.handle(),
            &ClientConfig::default(),
        )
    }

    #[test]
    fn test_defaults_follow_config() {
        let db = database();
        let defaults = db.shared.defaults();
        assert_eq!(defaults.max_watches, 10_000);
        assert_eq!(defaults.timeout, None);
        assert_eq!(defaults.retry_limit, None);
        assert_eq!(defaults.max_retry_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_options_update_defaults() {
        let db = database();
        db.set_option(&DatabaseOption::MaxWatches(3)).unwrap();
        db.set_option(&DatabaseOption::TransactionTimeout(250)).unwrap();
        db.set_option(&DatabaseOption::TransactionRetryLimit(2)).unwrap();
        db.set_option(&DatabaseOption::TransactionMaxRetryDelay(40)).unwrap();
        db.set_option(&DatabaseOption::TransactionSizeLimit(1_000)).unwrap();
        db.set_option(&DatabaseOption::MachineId("m1".into())).unwrap();

        assert_eq!(
            db.shared.defaults(),
            TransactionDefaults {
                max_watches: 3,
                timeout: Some(Duration::from_millis(250)),
                retry_limit: Some(2),
                max_retry_delay: Duration::from_millis(40),
                size_limit: 1_000,
            }
        );

        db.set_option(&DatabaseOption::TransactionRetryLimit(-1)).unwrap();
        db.set_option(&DatabaseOption::TransactionTimeout(0)).unwrap();
        let defaults = db.shared.defaults();
        assert_eq!(defaults.retry_limit, None);
        assert_eq!(defaults.timeout, None);
    }
}
