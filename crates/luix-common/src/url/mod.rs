//! Endpoint descriptors.
//!
//! A [`Url`] is the addressable identity of a provider, a consumer or a
//! registry. It is immutable: every `with_*` method returns a modified copy.
//!
//! # String Form
//!
//! ```text
//! protocol://host:port/path?key1=value1&key2=value2
//! ```
//!
//! Parameters are kept sorted so the string form is deterministic and
//! `parse(to_string(url)) == url` holds for every url.
//!
//! # Example
//!
//! ```
//! use luix_common::url::{params, Url};
//!
//! let url: Url = "luix://10.0.0.5:20880/com.acme.OrderService?group=default&version=1.0.0"
//!     .parse()
//!     .unwrap();
//!
//! assert_eq!(url.address(), "10.0.0.5:20880");
//! assert_eq!(url.group(), params::DEFAULT_GROUP);
//! assert_eq!(url.to_string().parse::<Url>().unwrap(), url);
//! ```

pub mod params;


use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::protocol::error::{LuixError, Result};

/// Key used by routers to match an inbound request with a bound service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKey {
    pub interface: String,
    pub group: String,
    pub version: String,
}

impl ServiceKey {
    pub fn new(
        interface: impl Into<String>,
        group: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            interface: interface.into(),
            group: group.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.group, self.interface, self.version)
    }
}

/// Endpoint descriptor shared by providers, consumers and registries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Url {
    protocol: String,
    host: String,
    port: u16,
    path: String,
    parameters: BTreeMap<String, String>,
}

impl Url {
    /// Creates a url without parameters.
    pub fn new(
        protocol: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            port,
            path: path.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Creates a provider url for the given interface.
    pub fn provider(
        protocol: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        interface: impl Into<String>,
    ) -> Self {
        Self::new(protocol, host, port, interface).with_parameter(params::TYPE, params::TYPE_PROVIDER)
    }

    /// Creates a consumer url. Consumers do not listen, so the port is always 0.
    pub fn consumer(
        protocol: impl Into<String>,
        host: impl Into<String>,
        interface: impl Into<String>,
    ) -> Self {
        Self::new(protocol, host, 0, interface).with_parameter(params::TYPE, params::TYPE_CONSUMER)
    }

    /// Creates a registry url. The path carries the registry name.
    pub fn registry(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let name = name.into();
        Self::new(name.clone(), host, port, name).with_parameter(params::TYPE, params::TYPE_REGISTRY)
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `host:port` of the endpoint.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn group(&self) -> &str {
        self.parameter_or(params::GROUP, params::DEFAULT_GROUP)
    }

    pub fn version(&self) -> &str {
        self.parameter_or(params::VERSION, params::DEFAULT_VERSION)
    }

    pub fn form(&self) -> Option<&str> {
        self.parameter(params::FORM)
    }

    pub fn url_type(&self) -> Option<&str> {
        self.parameter(params::TYPE)
    }

    pub fn is_provider(&self) -> bool {
        self.url_type() == Some(params::TYPE_PROVIDER)
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    pub fn parameter_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.parameter(key).unwrap_or(default)
    }

    /// Parses a parameter, falling back to `default` when it is absent or malformed.
    pub fn typed_parameter<T: FromStr>(&self, key: &str, default: T) -> T {
        self.parameter(key)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Parses a parameter, failing loudly when it is present but malformed.
    ///
    /// Used at initialization time where configuration errors must not be
    /// silently replaced by defaults.
    pub fn required_typed_parameter<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.parameter(key) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|_| {
                LuixError::Configuration(format!(
                    "Invalid value '{}' for parameter '{}' of {}",
                    value, key, self
                ))
            }),
        }
    }

    pub fn bool_parameter(&self, key: &str, default: bool) -> bool {
        self.typed_parameter(key, default)
    }

    pub fn duration_parameter(&self, key: &str, default_ms: u64) -> Duration {
        Duration::from_millis(self.typed_parameter(key, default_ms))
    }

    /// Splits a comma separated parameter into its non-empty items.
    pub fn list_parameter(&self, key: &str) -> Vec<String> {
        self.parameter(key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn with_parameter(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut url = self.clone();
        url.parameters.insert(key.into(), value.into());
        url
    }

    pub fn with_parameters<I, K, V>(&self, parameters: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut url = self.clone();
        for (key, value) in parameters {
            url.parameters.insert(key.into(), value.into());
        }
        url
    }

    pub fn without_parameter(&self, key: &str) -> Self {
        let mut url = self.clone();
        url.parameters.remove(key);
        url
    }

    pub fn with_path(&self, path: impl Into<String>) -> Self {
        let mut url = self.clone();
        url.path = path.into();
        url
    }

    pub fn with_address(&self, host: impl Into<String>, port: u16) -> Self {
        let mut url = self.clone();
        url.host = host.into();
        url.port = port;
        url
    }

    pub fn with_protocol(&self, protocol: impl Into<String>) -> Self {
        let mut url = self.clone();
        url.protocol = protocol.into();
        url
    }

    /// Uniqueness key of a provider endpoint: protocol, address, group, interface and version.
    pub fn identity(&self) -> String {
        format!(
            "{}://{}:{}/{}/{}/{}",
            self.protocol,
            self.host,
            self.port,
            self.group(),
            self.path,
            self.version()
        )
    }

    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(self.path.clone(), self.group(), self.version())
    }

    /// Url parameters without the ones that only matter to the local process.
    pub fn without_local_parameters(&self) -> Self {
        self.without_parameter(params::CODEC)
    }

    /// Parses the string form of a url.
    ///
    /// # Errors
    ///
    /// Returns [`LuixError::Configuration`] when the protocol, host or port is
    /// missing or malformed, or a parameter does not decode to UTF-8.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (protocol, rest) = input.split_once("://").ok_or_else(|| {
            LuixError::Configuration(format!("Missing protocol in url '{}'", input))
        })?;
        if protocol.is_empty() {
            return Err(LuixError::Configuration(format!("Empty protocol in url '{}'", input)));
        }

        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };

        let (authority, path) = match location.split_once('/') {
            Some((authority, path)) => (authority, path),
            None => (location, ""),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    LuixError::Configuration(format!("Invalid port '{}' in url '{}'", port, input))
                })?;
                (host, port)
            }
            None => (authority, 0),
        };

        let mut parameters = BTreeMap::new();
        if let Some(query) = query {
            for pair in query.split('&').filter(|pair| !pair.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                parameters.insert(decode(key, input)?, decode(value, input)?);
            }
        }

        Ok(Self {
            protocol: protocol.to_string(),
            host: host.to_string(),
            port,
            path: path.to_string(),
            parameters,
        })
    }
}

fn decode(component: &str, input: &str) -> Result<String> {
    urlencoding::decode(component)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| {
            LuixError::Configuration(format!(
                "Malformed parameter '{}' in url '{}': {}",
                component, input, e
            ))
        })
}

impl FromStr for Url {
    type Err = LuixError;

    fn from_str(s: &str) -> Result<Self> {
        Url::parse(s)
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)?;
        if !self.path.is_empty() {
            write!(f, "/{}", self.path)?;
        }
        let mut separator = '?';
        for (key, value) in &self.parameters {
            write!(
                f,
                "{}{}={}",
                separator,
                urlencoding::encode(key),
                urlencoding::encode(value)
            )?;
            separator = '&';
        }
        Ok(())
    }
}
