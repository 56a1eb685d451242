//! Lazy driver registration tests with a counting connection factory

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docsql::prelude::*;

struct MockConnection {
    version: String,
    version_checks: Arc<AtomicUsize>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        Ok(Vec::new())
    }

    async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<u64> {
        Ok(0)
    }

    async fn server_version(&self) -> Result<String> {
        self.version_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.version.clone())
    }

    async fn is_valid(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct MockFactory {
    version: String,
    connects: Arc<AtomicUsize>,
    version_checks: Arc<AtomicUsize>,
}

impl MockFactory {
    fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            connects: Arc::new(AtomicUsize::new(0)),
            version_checks: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn version_checks(&self) -> usize {
        self.version_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn connect(
        &self,
        _options: &ConnectionOptions,
        _driver_options: &DriverOptions,
    ) -> Result<Box<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        // Widen the window in which concurrent callers race
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(Box::new(MockConnection {
            version: self.version.clone(),
            version_checks: Arc::clone(&self.version_checks),
        }))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }
}

fn registry_with(factory: Arc<MockFactory>) -> DriverRegistry {
    let config = StorageConfig::new(
        SERVER_NAME,
        ConnectionOptions::new("cockpit").with_host("db.internal", 3306),
    );
    DriverRegistry::from_config(config)
        .unwrap()
        .with_resolver(move |_config| {
            Ok(Backend::new(
                "mysql",
                Arc::clone(&factory) as Arc<dyn ConnectionFactory>,
                Arc::new(MySqlVersionPolicy::default()),
                Arc::new(MySqlDialect),
            ))
        })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_use_connects_once() {
    let factory = Arc::new(MockFactory::new(
        "5.5.5-10.2.26-MariaDB-1:10.2.26+maria~bionic",
    ));
    let registry = Arc::new(registry_with(Arc::clone(&factory)));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.get().await })
        })
        .collect();

    let mut drivers = Vec::new();
    for handle in handles {
        drivers.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(factory.connects(), 1);
    assert_eq!(factory.version_checks(), 1);
    assert!(drivers.iter().all(|d| Arc::ptr_eq(d, &drivers[0])));
    assert_eq!(drivers[0].server_version().family, "MariaDB");
    assert_eq!(drivers[0].state(), DriverState::Ready);
    assert!(registry.is_initialized());
}

#[tokio::test]
async fn test_later_calls_reuse_the_driver() {
    let factory = Arc::new(MockFactory::new("5.7.27-0ubuntu0.18.04.1"));
    let registry = registry_with(Arc::clone(&factory));
    assert!(!registry.is_initialized());

    let first = registry.get().await.unwrap();
    let second = registry.get().await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(factory.connects(), 1);
    assert_eq!(registry.key(), STORAGE_KEY);
}

#[tokio::test]
async fn test_rejected_version_is_retried_on_next_call() {
    let factory = Arc::new(MockFactory::new("10.2.5-MariaDB"));
    let registry = registry_with(Arc::clone(&factory));

    let err = registry.get().await.unwrap_err();
    assert!(matches!(err, Error::UnsupportedVersion { .. }));
    assert!(!registry.is_initialized());

    // Nothing is cached after a failure
    assert!(registry.get().await.is_err());
    assert_eq!(factory.connects(), 2);
    assert_eq!(factory.version_checks(), 2);
}

#[test]
fn test_only_the_sqldriver_server_is_accepted() {
    let ours = StorageConfig::new(SERVER_NAME, ConnectionOptions::new("cockpit"));
    let theirs = StorageConfig::new("mongolite", ConnectionOptions::new("cockpit"));

    assert!(DriverRegistry::accepts(&ours));
    assert!(!DriverRegistry::accepts(&theirs));
    assert!(DriverRegistry::from_config(theirs).is_none());
}
