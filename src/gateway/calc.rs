//! CalcGateway - the request pipeline

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::analytics::{
    AnalyticsBatcher, FIELD_CACHE_HITS, FIELD_CACHE_MISSES, FIELD_CALLS, FIELD_ERRORS,
};
use crate::cache::{ResultCache, WorkbookCache};
use crate::catalog::ServiceCatalog;
use crate::limiter::{RateLimitConfig, RateLimiter};
use crate::normalize::normalize_inputs;
use crate::tasks::BackgroundTasks;
use crate::types::{
    CalcRequest, CalcResponse, InputSet, NamedValue, OutputResult, ResponseMetadata,
    ServiceDefinition,
};
use crate::{CellgateError, Result, executor, now_ms, telemetry};

/// Rate-limit identity used when the caller does not supply one.
const ANONYMOUS_CLIENT: &str = "anonymous";

/// Gateway serving calculation requests.
///
/// Per request: catalog lookup, token check, input normalization, rate
/// limit, result cache, then (on a miss) the guarded workbook and the
/// executor. Built with [`Cellgate::builder()`](crate::Cellgate::builder).
pub struct CalcGateway {
    pub(super) catalog: Arc<dyn ServiceCatalog>,
    pub(super) results: ResultCache,
    pub(super) workbooks: WorkbookCache,
    pub(super) limiter: RateLimiter,
    pub(super) analytics: AnalyticsBatcher,
    pub(super) tasks: BackgroundTasks,
    pub(super) rate_limit: RateLimitConfig,
    pub(super) request_timeout: Option<Duration>,
}

impl std::fmt::Debug for CalcGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalcGateway")
            .field("rate_limit", &self.rate_limit)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl CalcGateway {
    /// Serve a request, rate limiting on the request token (or anonymously).
    pub async fn calculate(&self, request: CalcRequest) -> Result<CalcResponse> {
        let client = request
            .token
            .clone()
            .unwrap_or_else(|| ANONYMOUS_CLIENT.to_string());
        self.calculate_for(request, &client).await
    }

    /// Serve a request, rate limiting on `client` (an IP address, an API
    /// key) within the requested service.
    pub async fn calculate_for(&self, request: CalcRequest, client: &str) -> Result<CalcResponse> {
        let started = Instant::now();
        let service_id = request.service_id.clone();

        let result = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, self.run(request, client))
                .await
                .unwrap_or_else(|_| Err(CellgateError::Timeout(limit))),
            None => self.run(request, client).await,
        };

        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.code(),
        };
        let cached = result.as_ref().is_ok_and(|r| r.metadata.cached);
        metrics::counter!(telemetry::REQUESTS_TOTAL, "service" => service_id.clone(), "status" => status)
            .increment(1);
        metrics::histogram!(
            telemetry::REQUEST_DURATION_SECONDS,
            "service" => service_id.clone(),
            "cached" => if cached { "true" } else { "false" }
        )
        .record(started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            debug!(service_id = %service_id, code = e.code(), error = %e, "request failed");
            if !matches!(e, CellgateError::NotFound(_)) {
                self.analytics.track(&service_id, FIELD_ERRORS, 1);
            }
        }
        result
    }

    async fn run(&self, request: CalcRequest, client: &str) -> Result<CalcResponse> {
        let started = Instant::now();
        let service = self
            .catalog
            .service(&request.service_id)
            .await?
            .ok_or_else(|| CellgateError::NotFound(request.service_id.clone()))?;
        let service_id = service.service_id.as_str();

        if service.requires_token {
            let token = request.token.as_deref().ok_or(CellgateError::Unauthorized)?;
            if !self.catalog.verify_token(service_id, token).await? {
                return Err(CellgateError::Unauthorized);
            }
        }

        let inputs = normalize_inputs(&request.inputs, &service)?;

        let limit = service
            .rate_limit
            .map(RateLimitConfig::from)
            .unwrap_or(self.rate_limit);
        let decision = self
            .limiter
            .check(&format!("{service_id}:{client}"), &limit)
            .await;
        if !decision.allowed {
            metrics::counter!(telemetry::RATE_LIMITED_TOTAL, "service" => service_id.to_string())
                .increment(1);
            return Err(CellgateError::RateLimited {
                retry_after: decision.retry_after.unwrap_or_default(),
            });
        }

        self.analytics.track(service_id, FIELD_CALLS, 1);

        if service.use_caching
            && !request.bypass_cache
            && let Some(hit) = self.results.get(&service, &inputs).await
        {
            self.analytics.track(service_id, FIELD_CACHE_HITS, 1);
            return Ok(respond(&service, &inputs, hit.outputs, started, true));
        }
        self.analytics.track(service_id, FIELD_CACHE_MISSES, 1);

        let outputs = self
            .workbooks
            .with_workbook(&service, |workbook| {
                executor::execute(workbook, &service, &inputs)
            })
            .await
            .map_err(|e| sanitize(service_id, e))?;

        if service.use_caching {
            self.results.set(&service, &inputs, outputs.clone());
        }
        Ok(respond(&service, &inputs, outputs, started, false))
    }

    /// Drop every cached artifact of `service_id`: results, the loaded
    /// document, its snapshot and its remote tables.
    pub async fn invalidate_service(&self, service_id: &str) -> Result<()> {
        let version = self.catalog.service(service_id).await?.map(|s| s.version);
        let results = self.results.invalidate_service(service_id);
        self.workbooks.invalidate_service(service_id, version).await;
        info!(service_id, results, "invalidated service caches");
        Ok(())
    }

    /// Write buffered analytics now.
    pub async fn flush_analytics(&self) {
        self.analytics.flush().await;
    }

    /// Wait for queued background writes.
    pub async fn drain_background(&self) {
        self.tasks.drain().await;
    }

    pub fn result_cache(&self) -> &ResultCache {
        &self.results
    }

    pub fn workbook_cache(&self) -> &WorkbookCache {
        &self.workbooks
    }
}

/// Replace raw engine failures with a caller-safe error.
fn sanitize(service_id: &str, err: CellgateError) -> CellgateError {
    match err {
        CellgateError::Engine(detail) => {
            warn!(service_id, detail = %detail, "calculation failed");
            CellgateError::Calculation(service_id.to_string())
        }
        other => other,
    }
}

fn respond(
    service: &ServiceDefinition,
    inputs: &InputSet,
    outputs: Vec<OutputResult>,
    started: Instant,
    cached: bool,
) -> CalcResponse {
    let echoed = service
        .inputs
        .iter()
        .filter_map(|def| {
            inputs.get(&def.name).map(|value| NamedValue {
                name: def.name.clone(),
                value: value.clone(),
            })
        })
        .collect();

    CalcResponse {
        service_id: service.service_id.clone(),
        inputs: echoed,
        outputs,
        metadata: ResponseMetadata {
            execution_time_ms: started.elapsed().as_millis() as u64,
            cached,
            timestamp: now_ms(),
        },
    }
}
