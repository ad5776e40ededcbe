//! Built-in diagnostics service, exposed on every server address.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

use crate::router::ServiceRouter;
use crate::service::ServiceDefinition;

pub const BUILTIN_INTERFACE: &str = "luix.BuiltinService";
pub const METHOD_GET_APPLICATION_INFO: &str = "getApplicationInfo";
pub const METHOD_GET_SERVER_INFO: &str = "getServerInfo";

/// Application served by a provider process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInfo {
    pub name: String,
    pub version: String,
    /// `group/interface/version` of every application service on this address
    pub services: Vec<String>,
}

/// Host a provider runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub host_name: String,
    pub os_name: String,
    pub os_version: String,
    pub time_zone: String,
    pub system_time: String,
    pub cpu_cores: usize,
    pub total_memory_bytes: u64,
    pub used_memory_bytes: u64,
}

impl ServerInfo {
    pub fn collect() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::new())
                .with_memory(MemoryRefreshKind::new().with_ram()),
        );
        let now = Local::now();
        Self {
            host_name: System::host_name().unwrap_or_default(),
            os_name: System::name().unwrap_or_default(),
            os_version: System::os_version().unwrap_or_default(),
            time_zone: now.offset().to_string(),
            system_time: now.to_rfc3339(),
            cpu_cores: system.cpus().len(),
            total_memory_bytes: system.total_memory(),
            used_memory_bytes: system.used_memory(),
        }
    }
}

/// Application name and version reported by the built-in service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub name: String,
    pub version: String,
}

impl Default for Application {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Built-in service answering for the router it is bound to.
pub fn builtin_service(application: Application, router: Weak<ServiceRouter>) -> ServiceDefinition {
    let application = Arc::new(application);
    ServiceDefinition::new(BUILTIN_INTERFACE)
        .method(METHOD_GET_APPLICATION_INFO, &[], move |_: ()| {
            let application = application.clone();
            let router = router.clone();
            async move {
                let services = router
                    .upgrade()
                    .map(|router| {
                        router
                            .application_services()
                            .iter()
                            .map(ToString::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(ApplicationInfo {
                    name: application.name.clone(),
                    version: application.version.clone(),
                    services,
                })
            }
        })
        .method(METHOD_GET_SERVER_INFO, &[], |_: ()| async move {
            Ok(ServerInfo::collect())
        })
}
