//! Implementations of the `luix` subcommands.

use anyhow::{anyhow, Context, Result};
use luix_client::{CallOptions, Components, MethodTable, StubConfig};
use luix_common::url::{params, Url};
use luix_registry::Registries;
use luix_server::{Application, ProviderExposer, BUILTIN_INTERFACE, METHOD_GET_SERVER_INFO};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Splits `host:port`.
pub fn parse_address(address: &str) -> Result<(String, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("Invalid address '{}': expected host:port", address))?;
    if host.is_empty() {
        return Err(anyhow!("Invalid address '{}': missing host", address));
    }
    let port = port
        .parse()
        .with_context(|| format!("Invalid port in address '{}'", address))?;
    Ok((host.to_string(), port))
}

/// Reads call arguments: a JSON array holds one element per parameter,
/// any other value is the single argument.
pub fn parse_arguments(args: &str) -> Result<Vec<Value>> {
    if args.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(args).context("Invalid JSON in args")?;
    Ok(match value {
        Value::Array(values) => values,
        value => vec![value],
    })
}

/// Splits a comma separated type list, ignoring blanks.
pub fn parse_types(types: &str) -> Vec<String> {
    types
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Settings of `luix serve`.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub address: String,
    pub registries: Vec<String>,
    pub application: Application,
}

/// Starts a server carrying the built-in service and keeps it running until
/// `shutdown` completes.
///
/// The built-in provider is registered and activated on every registry, and
/// deregistered again before the server stops.
pub async fn run_serve<F>(options: ServeOptions, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let (host, port) = parse_address(&options.address)?;
    let exposer = ProviderExposer::new(options.application.clone());
    let url = exposer
        .open(&Url::provider("luix", host, port, BUILTIN_INTERFACE))
        .await?
        .with_parameter(params::APPLICATION, options.application.name.clone());
    info!(url = %url, "Serving built-in service");

    let catalog = Registries::in_memory();
    let mut registered = Vec::new();
    for registry in &options.registries {
        let registry_url = Url::parse(registry)?;
        let registry = catalog.get_or_create(&registry_url)?;
        registry.register(&url).await?;
        registry.activate(&url).await?;
        info!(registry = %registry_url, "Registered built-in service");
        registered.push(registry);
    }

    shutdown.await;
    info!("Shutting down");

    for registry in registered {
        if let Err(e) = registry.deregister(&url).await {
            warn!(registry = %registry.registry_url(), "Failed to deregister: {}", e);
        }
    }
    catalog.close_all().await;
    exposer.shutdown().await;
    Ok(())
}

/// Settings of `luix call`.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub url: String,
    pub method: String,
    pub types: Vec<String>,
    pub args: Vec<Value>,
    pub timeout_ms: u64,
}

/// Makes one generic call to the provider at `request.url`.
pub async fn run_call(request: CallRequest) -> Result<Value> {
    let provider = Url::parse(&request.url)?;
    let components = Components::new(Arc::new(Registries::in_memory()));
    let proxy = StubConfig::direct(&provider)
        .with_timeout(request.timeout_ms)
        .build(MethodTable::new(), &components)
        .await?;

    let types: Vec<&str> = request.types.iter().map(String::as_str).collect();
    let options = CallOptions {
        group: provider.group().to_string(),
        version: provider.version().to_string(),
        ..CallOptions::default()
    }
    .with_timeout(request.timeout_ms);
    let result = proxy
        .generic()
        .invoke(&request.method, &types, request.args, &options)
        .await;
    proxy.close().await;
    Ok(result?)
}

/// Fetches the host information of the server at `address`.
pub async fn run_info(address: &str, timeout_ms: u64) -> Result<Value> {
    let (host, port) = parse_address(address)?;
    run_call(CallRequest {
        url: Url::provider("luix", host, port, BUILTIN_INTERFACE).to_string(),
        method: METHOD_GET_SERVER_INFO.to_string(),
        types: Vec::new(),
        args: Vec::new(),
        timeout_ms,
    })
    .await
}
