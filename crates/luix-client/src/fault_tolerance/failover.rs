use async_trait::async_trait;
use luix_common::protocol::{generate_request_id, LuixError, Request, Response, Result};
use luix_common::url::{params, Url};
use tracing::{debug, warn};

use super::{FaultTolerance, FAILOVER};
use crate::load_balancer::LoadBalancer;

/// Retries framework failures on the next active invoker.
///
/// The retry budget comes from the request's `maxRetries` attachment, or the
/// strategy default when the request carries none. The candidate list is
/// fetched once; attempt `n` goes to candidate `n % len`. Business errors end
/// the call at once.
#[derive(Debug, Clone, Copy)]
pub struct FailoverFaultTolerance {
    default_max_retries: u32,
}

impl Default for FailoverFaultTolerance {
    fn default() -> Self {
        Self::new(params::DEFAULT_MAX_RETRIES)
    }
}

impl FailoverFaultTolerance {
    pub fn new(default_max_retries: u32) -> Self {
        Self {
            default_max_retries,
        }
    }

    pub fn from_url(url: &Url) -> Self {
        Self::new(url.typed_parameter(params::MAX_RETRIES, params::DEFAULT_MAX_RETRIES))
    }
}

#[async_trait]
impl FaultTolerance for FailoverFaultTolerance {
    fn name(&self) -> &'static str {
        FAILOVER
    }

    async fn invoke(&self, load_balancer: &dyn LoadBalancer, mut request: Request) -> Result<Response> {
        let budget = request.max_retries().unwrap_or(self.default_max_retries);
        let candidates = load_balancer.select_all(&request)?;

        for attempt in 0..=budget {
            let invoker = &candidates[attempt as usize % candidates.len()];
            request.retry_number = attempt;
            if attempt > 0 {
                // A late answer to an earlier attempt must not complete this one.
                request.id = generate_request_id();
            }

            match invoker.invoke(request.clone()).await {
                Ok(response) => {
                    if attempt > 0 {
                        debug!(
                            url = %invoker.url(),
                            attempt,
                            "Call succeeded after retrying"
                        );
                    }
                    return Ok(response);
                }
                Err(e) if e.is_business() => return Err(e),
                Err(e) if attempt == budget => {
                    if budget == 0 {
                        return Err(e);
                    }
                    return Err(LuixError::RetriesExhausted {
                        url: invoker.url().to_string(),
                        retries: budget,
                        source: Box::new(e),
                    });
                }
                Err(e) => warn!(
                    url = %invoker.url(),
                    method = %request.method_name,
                    attempt,
                    "Call failed, trying next provider: {}",
                    e
                ),
            }
        }

        Err(LuixError::RetriesExhausted {
            url: candidates
                .last()
                .map(|invoker| invoker.url().to_string())
                .unwrap_or_default(),
            retries: budget,
            source: Box::new(LuixError::NoActiveInvoker(request.interface_name.clone())),
        })
    }
}
