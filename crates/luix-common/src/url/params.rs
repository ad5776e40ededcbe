//! Recognised url parameter names and their default values.

pub const GROUP: &str = "group";
pub const DEFAULT_GROUP: &str = "default";

pub const VERSION: &str = "version";
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Role of the url: provider, consumer or registry.
pub const TYPE: &str = "type";
pub const TYPE_PROVIDER: &str = "provider";
pub const TYPE_CONSUMER: &str = "consumer";
pub const TYPE_REGISTRY: &str = "registry";

/// Logical form, used to partition providers of one interface.
pub const FORM: &str = "form";

pub const CODEC: &str = "codec";
pub const DEFAULT_CODEC: &str = "luix";

pub const SERIALIZER: &str = "serializer";
pub const DEFAULT_SERIALIZER: &str = "postcard";

pub const LOAD_BALANCER: &str = "loadBalancer";
pub const DEFAULT_LOAD_BALANCER: &str = "random";

pub const FAULT_TOLERANCE: &str = "faultTolerance";
pub const DEFAULT_FAULT_TOLERANCE: &str = "failover";

pub const MAX_RETRIES: &str = "maxRetries";
pub const DEFAULT_MAX_RETRIES: u32 = 0;

pub const REQUEST_TIMEOUT: &str = "requestTimeout";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 500;

pub const CONNECT_TIMEOUT: &str = "connectTimeout";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1000;

pub const MAX_CONTENT_LENGTH: &str = "maxContentLength";
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 10 * 1024 * 1024;

pub const MIN_CLIENT_CONNECTION: &str = "minClientConnection";
pub const DEFAULT_MIN_CLIENT_CONNECTION: usize = 2;

pub const MAX_CLIENT_FAILED_CONNECTION: &str = "maxClientFailedConnection";
pub const DEFAULT_MAX_CLIENT_FAILED_CONNECTION: u32 = 10;

pub const MAX_PENDING_REQUESTS: &str = "maxPendingRequests";
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 20_000;

pub const ASYNC_INIT_CONNECTION: &str = "asyncInitConnection";
pub const DEFAULT_ASYNC_INIT_CONNECTION: bool = false;

pub const SHARED_SERVER: &str = "sharedServer";
pub const DEFAULT_SHARED_SERVER: bool = true;

pub const MIN_WORKER_THREAD: &str = "minWorkerThread";
pub const MAX_WORKER_THREAD: &str = "maxWorkerThread";
pub const SHARED_MIN_WORKER_THREAD: usize = 20;
pub const SHARED_MAX_WORKER_THREAD: usize = 200;
pub const DEDICATED_MIN_WORKER_THREAD: usize = 10;
pub const DEDICATED_MAX_WORKER_THREAD: usize = 100;

/// Bounded accept-to-worker queue, 0 means unbounded.
pub const WORKER_QUEUE_SIZE: &str = "workerQueueSize";
pub const DEFAULT_WORKER_QUEUE_SIZE: usize = 0;

/// Comma separated `host:port` list for direct connections.
pub const ADDRESS: &str = "address";

/// Comma separated `host:port=weight` list for the weighted load balancer.
pub const WEIGHTS: &str = "weights";

pub const HEALTH_CHECKER: &str = "healthChecker";
pub const DEFAULT_HEALTH_CHECKER: &str = "default";

pub const RETRY_INTERVAL: &str = "retryInterval";
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 30_000;

pub const APPLICATION: &str = "application";
