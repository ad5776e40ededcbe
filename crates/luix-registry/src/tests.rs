use std::sync::Arc;
use std::time::Duration;

use luix_common::protocol::{LuixError, Result};
use luix_common::url::{params, Url};
use parking_lot::Mutex;

use crate::catalog::{CatalogBackend, MemoryCatalog};
use crate::direct::DirectRegistry;
use crate::failback::FailbackRegistry;
use crate::keystore::{node_path, KeyStoreBackend, KeyValueStore, MemoryKeyValueStore, StatusDir};
use crate::registry::{FnListener, NotifyListener, Registry};
use crate::Registries;

const INTERFACE: &str = "com.acme.OrderService";

fn provider(host: &str) -> Url {
    Url::provider("luix", host, 20880, INTERFACE)
}

fn consumer() -> Url {
    Url::consumer("luix", "10.0.0.9", INTERFACE)
}

type Notifications = Arc<Mutex<Vec<Vec<Url>>>>;

fn recording_listener() -> (Arc<dyn NotifyListener>, Notifications) {
    let notifications: Notifications = Arc::new(Mutex::new(Vec::new()));
    let recorded = notifications.clone();
    let listener: Arc<dyn NotifyListener> = Arc::new(FnListener(
        move |_: &Url, _: &str, providers: Vec<Url>| -> Result<()> {
            recorded.lock().push(providers);
            Ok(())
        },
    ));
    (listener, notifications)
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

fn keystore_registry(store: Arc<MemoryKeyValueStore>) -> Arc<FailbackRegistry<KeyStoreBackend>> {
    let registry_url = Url::registry("keystore", "127.0.0.1", 2181)
        .with_parameter(params::RETRY_INTERVAL, "50");
    FailbackRegistry::new(registry_url, KeyStoreBackend::new(store)).unwrap()
}

#[tokio::test]
async fn test_keystore_register_is_inactive_until_activated() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let registry = keystore_registry(store.clone());
    let url = provider("10.0.0.1");

    registry.register(&url).await.unwrap();
    assert!(store
        .read(&node_path(&url, StatusDir::Inactive))
        .await
        .unwrap()
        .is_some());
    assert!(registry.discover(&consumer()).await.unwrap().is_empty());

    registry.activate(&url).await.unwrap();
    assert_eq!(registry.discover(&consumer()).await.unwrap(), vec![url.clone()]);
    assert!(store
        .read(&node_path(&url, StatusDir::Inactive))
        .await
        .unwrap()
        .is_none());

    registry.deactivate(&url).await.unwrap();
    assert!(registry.discover(&consumer()).await.unwrap().is_empty());

    registry.deregister(&url).await.unwrap();
    assert!(store
        .read(&node_path(&url, StatusDir::Inactive))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_keystore_subscribe_delivers_full_snapshots() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let registry = keystore_registry(store);
    let (listener, notifications) = recording_listener();

    registry.subscribe(&consumer(), listener.clone()).await.unwrap();
    assert_eq!(notifications.lock().last().cloned(), Some(vec![]));

    let a = provider("10.0.0.1");
    let b = provider("10.0.0.2");
    registry.register(&a).await.unwrap();
    registry.activate(&a).await.unwrap();
    registry.register(&b).await.unwrap();
    registry.activate(&b).await.unwrap();

    wait_for(|| notifications.lock().last().map(Vec::len) == Some(2)).await;

    registry.deactivate(&a).await.unwrap();
    wait_for(|| notifications.lock().last() == Some(&vec![b.clone()])).await;

    registry.unsubscribe(&consumer(), &listener).await.unwrap();
    let delivered = notifications.lock().len();
    registry.activate(&a).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(notifications.lock().len(), delivered);
}

#[tokio::test]
async fn test_keystore_filters_group_and_version() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let registry = keystore_registry(store);
    let other_group = provider("10.0.0.1").with_parameter(params::GROUP, "blue");
    let matching = provider("10.0.0.2");

    for url in [&other_group, &matching] {
        registry.register(url).await.unwrap();
        registry.activate(url).await.unwrap();
    }

    assert_eq!(registry.discover(&consumer()).await.unwrap(), vec![matching]);
    assert_eq!(registry.discover_all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_keystore_groups_share_an_address() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let registry = keystore_registry(store);
    let blue = provider("10.0.0.1").with_parameter(params::GROUP, "blue");
    let green = provider("10.0.0.1").with_parameter(params::GROUP, "green");

    assert_eq!(crate::keystore::node_name(&provider("10.0.0.1")), "10.0.0.1:20880");
    assert_eq!(
        crate::keystore::node_name(&green),
        "10.0.0.1:20880@green@1.0.0"
    );

    for url in [&blue, &green] {
        registry.register(url).await.unwrap();
        registry.activate(url).await.unwrap();
    }
    registry.deregister(&blue).await.unwrap();

    let green_consumer = consumer().with_parameter(params::GROUP, "green");
    assert_eq!(registry.discover(&green_consumer).await.unwrap(), vec![green]);
    assert_eq!(registry.discover_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failback_retries_register_when_store_recovers() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let registry = keystore_registry(store.clone());
    let url = provider("10.0.0.1");

    store.set_available(false);
    registry.register(&url).await.unwrap();
    assert!(registry.has_failed_operations());
    assert_eq!(registry.registered_urls(), vec![url.clone()]);

    store.set_available(true);
    registry.retry_failed().await;
    assert!(!registry.has_failed_operations());
    assert!(store
        .read(&node_path(&url, StatusDir::Inactive))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_failback_serves_cached_discovery() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let registry = keystore_registry(store.clone());
    let url = provider("10.0.0.1");
    registry.register(&url).await.unwrap();
    registry.activate(&url).await.unwrap();
    assert_eq!(registry.discover(&consumer()).await.unwrap(), vec![url.clone()]);

    store.set_available(false);
    assert_eq!(registry.discover(&consumer()).await.unwrap(), vec![url.clone()]);

    // A failed subscribe is answered from the cache and retried later.
    let (listener, notifications) = recording_listener();
    registry.subscribe(&consumer(), listener).await.unwrap();
    assert_eq!(notifications.lock().last().cloned(), Some(vec![url]));
    assert!(registry.has_failed_operations());

    store.set_available(true);
    registry.retry_failed().await;
    assert!(!registry.has_failed_operations());
}

#[tokio::test]
async fn test_failing_listener_does_not_break_others() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let registry = keystore_registry(store);
    let failing: Arc<dyn NotifyListener> = Arc::new(FnListener(
        |_: &Url, _: &str, _: Vec<Url>| -> Result<()> {
            Err(LuixError::Registry("listener failed".to_string()))
        },
    ));
    let (listener, notifications) = recording_listener();

    registry.subscribe(&consumer(), failing).await.unwrap();
    registry.subscribe(&consumer(), listener).await.unwrap();

    let url = provider("10.0.0.1");
    registry.register(&url).await.unwrap();
    registry.activate(&url).await.unwrap();
    wait_for(|| notifications.lock().last() == Some(&vec![url.clone()])).await;
}

#[tokio::test]
async fn test_catalog_activate_and_subscribe() {
    let catalog = Arc::new(MemoryCatalog::new());
    let registry = FailbackRegistry::new(
        Url::registry("catalog", "127.0.0.1", 8500),
        CatalogBackend::new(catalog, Duration::from_secs(30)),
    )
    .unwrap();
    let (listener, notifications) = recording_listener();
    registry.subscribe(&consumer(), listener).await.unwrap();

    let url = provider("10.0.0.1");
    registry.register(&url).await.unwrap();
    assert!(registry.discover(&consumer()).await.unwrap().is_empty());

    registry.activate(&url).await.unwrap();
    assert_eq!(registry.discover(&consumer()).await.unwrap(), vec![url.clone()]);
    wait_for(|| notifications.lock().last() == Some(&vec![url.clone()])).await;

    registry.deregister(&url).await.unwrap();
    wait_for(|| notifications.lock().last() == Some(&vec![])).await;
    registry.close().await;
}

#[tokio::test]
async fn test_catalog_heartbeat_keeps_short_ttl_alive() {
    let catalog = Arc::new(MemoryCatalog::new());
    let registry = FailbackRegistry::new(
        Url::registry("catalog", "127.0.0.1", 8500),
        CatalogBackend::new(catalog, Duration::from_millis(60)),
    )
    .unwrap();
    let url = provider("10.0.0.1");
    registry.register(&url).await.unwrap();
    registry.activate(&url).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(registry.discover(&consumer()).await.unwrap(), vec![url]);
    registry.close().await;
}

#[test]
fn test_catalog_tags_round_trip_the_url() {
    let url = provider("10.0.0.1").with_parameter(params::FORM, "blue");
    let service = crate::catalog::to_catalog_service(&url);
    assert_eq!(service.name, "luix-blue");
    assert_eq!(service.id, format!("10.0.0.1:20880-{}", INTERFACE));
    assert!(service.tags.contains(&"protocol_luix".to_string()));
    assert_eq!(crate::catalog::to_url(&service), Some(url));

    let versioned = provider("10.0.0.1").with_parameter(params::VERSION, "2.0.0");
    assert_eq!(
        crate::catalog::instance_id(&versioned),
        format!("10.0.0.1:20880-{}@default@2.0.0", INTERFACE)
    );
}

#[tokio::test]
async fn test_direct_registry_notifies_every_address_once() {
    let registry = DirectRegistry::new(
        Url::registry("direct", "127.0.0.1", 0)
            .with_parameter(params::ADDRESS, "10.0.0.1:20880,10.0.0.2:20881"),
    )
    .unwrap();
    let (listener, notifications) = recording_listener();
    registry.subscribe(&consumer(), listener).await.unwrap();

    let delivered = notifications.lock().clone();
    assert_eq!(delivered.len(), 1);
    let addresses: Vec<String> = delivered[0].iter().map(Url::address).collect();
    assert_eq!(addresses, vec!["10.0.0.1:20880", "10.0.0.2:20881"]);
    assert!(delivered[0].iter().all(Url::is_provider));
}

#[test]
fn test_direct_registry_rejects_bad_address() {
    let url = Url::registry("direct", "127.0.0.1", 0).with_parameter(params::ADDRESS, "nohost");
    assert!(matches!(
        DirectRegistry::new(url),
        Err(LuixError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_registries_share_instances_by_url() {
    let registries = Registries::in_memory();
    let url = Url::registry("keystore", "127.0.0.1", 2181);
    let first = registries.get_or_create(&url).unwrap();
    let second = registries.get_or_create(&url).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registries.factory_names(), vec!["catalog", "direct", "keystore"]);

    let unknown = registries.get_or_create(&Url::registry("etcd", "127.0.0.1", 2379));
    assert!(matches!(unknown, Err(LuixError::Configuration(_))));
    registries.close_all().await;
    assert!(registries.registries().is_empty());
}
