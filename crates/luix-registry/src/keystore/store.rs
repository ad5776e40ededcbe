//! Hierarchical key store contract and its in-memory implementation.

use async_trait::async_trait;
use luix_common::protocol::{LuixError, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Operations the key-store registry needs from a hierarchical coordination
/// service (znodes, etcd prefixes and the like).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Creates or overwrites `path`, creating missing parents.
    async fn create(&self, path: &str, data: &str, ephemeral: bool) -> Result<()>;

    /// Removes `path` and everything below it. Missing paths are ignored.
    async fn delete(&self, path: &str) -> Result<()>;

    async fn read(&self, path: &str) -> Result<Option<String>>;

    /// Names of the direct children of `path`.
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    /// Receiver that changes whenever a direct child of `path` is created,
    /// updated or removed.
    fn watch_children(&self, path: &str) -> watch::Receiver<u64>;
}

#[derive(Debug, Clone)]
struct Node {
    data: String,
    ephemeral: bool,
}

/// In-memory [`KeyValueStore`] shared by every registry created from it.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    nodes: Mutex<BTreeMap<String, Node>>,
    watchers: Mutex<HashMap<String, watch::Sender<u64>>>,
    unavailable: AtomicBool,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing the connection to the coordination service.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Removes every ephemeral node, as a session expiry would.
    pub fn expire_session(&self) {
        let removed: Vec<String> = {
            let mut nodes = self.nodes.lock();
            let ephemeral: Vec<String> = nodes
                .iter()
                .filter(|(_, node)| node.ephemeral)
                .map(|(path, _)| path.clone())
                .collect();
            for path in &ephemeral {
                nodes.remove(path);
            }
            ephemeral
        };
        for path in removed {
            self.touch_parent(&path);
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(LuixError::Registry("Key store unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn touch_parent(&self, path: &str) {
        if let Some(parent) = parent_of(path) {
            let watchers = self.watchers.lock();
            if let Some(sender) = watchers.get(parent) {
                sender.send_modify(|version| *version += 1);
            }
        }
    }
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) if path.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(index) => Some(&path[..index]),
    }
}

fn validate(path: &str) -> Result<()> {
    if !path.starts_with('/') || (path.len() > 1 && path.ends_with('/')) {
        return Err(LuixError::Registry(format!("Invalid path '{}'", path)));
    }
    Ok(())
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn create(&self, path: &str, data: &str, ephemeral: bool) -> Result<()> {
        self.check_available()?;
        validate(path)?;

        let mut created_parents = Vec::new();
        {
            let mut nodes = self.nodes.lock();
            let mut current = parent_of(path);
            while let Some(parent) = current {
                if parent == "/" || nodes.contains_key(parent) {
                    break;
                }
                nodes.insert(
                    parent.to_string(),
                    Node {
                        data: String::new(),
                        ephemeral: false,
                    },
                );
                created_parents.push(parent.to_string());
                current = parent_of(parent);
            }
            nodes.insert(
                path.to_string(),
                Node {
                    data: data.to_string(),
                    ephemeral,
                },
            );
        }

        for parent in created_parents {
            self.touch_parent(&parent);
        }
        self.touch_parent(path);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.check_available()?;
        validate(path)?;

        let removed = {
            let mut nodes = self.nodes.lock();
            let prefix = format!("{}/", path);
            let doomed: Vec<String> = nodes
                .keys()
                .filter(|key| key.as_str() == path || key.starts_with(&prefix))
                .cloned()
                .collect();
            for key in &doomed {
                nodes.remove(key);
            }
            !doomed.is_empty()
        };

        if removed {
            self.touch_parent(path);
        }
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.nodes.lock().get(path).map(|node| node.data.clone()))
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        self.check_available()?;
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        let nodes = self.nodes.lock();
        Ok(nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect())
    }

    fn watch_children(&self, path: &str) -> watch::Receiver<u64> {
        let mut watchers = self.watchers.lock();
        watchers
            .entry(path.to_string())
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }
}
