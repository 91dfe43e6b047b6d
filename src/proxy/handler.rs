//! Caching Handler
//!
//! Decides per request whether to serve from the store, revalidate with the
//! origin, or forward, and writes cacheable origin responses back.
//!
//! Store failures only cost cache efficiency: a failed read is a miss and a
//! failed write or delete is logged and otherwise ignored. Origin failures
//! reach the client unless a stale entry may stand in.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheKey, CacheStats, CacheStore, HeaderList, Vary};
use crate::error::{CacheError, Result};
use crate::policy::freshness::HEURISTICALLY_CACHEABLE;
use crate::policy::headers::{
    client_not_modified, fmt_http_date, strip_client_conditionals, WARNING_REVALIDATION_FAILED,
    WARNING_STALE, X_CACHE,
};
use crate::policy::{CacheControl, Freshness};
use crate::proxy::{Disposition, HandlerOptions, Outcome};
use crate::upstream::{OriginForwarder, OriginRequest, OriginResponse};

/// Origin statuses treated like a failed fetch when a stale entry exists.
const ORIGIN_ERROR_STATUSES: [u16; 4] = [500, 502, 503, 504];

// A stored entry together with the key it was found under.
struct Lookup {
    key: CacheKey,
    entry: Option<CacheEntry>,
}

// == Caching Handler ==
/// HTTP caching layer in front of an [`OriginForwarder`].
///
/// The store and forwarder are shared; one handler serves any number of
/// concurrent requests.
pub struct CachingHandler {
    store: Arc<dyn CacheStore>,
    forwarder: Arc<dyn OriginForwarder>,
    options: HandlerOptions,
    stats: Arc<CacheStats>,
}

impl CachingHandler {
    pub fn new(
        store: Arc<dyn CacheStore>,
        forwarder: Arc<dyn OriginForwarder>,
        options: HandlerOptions,
    ) -> Self {
        Self {
            store,
            forwarder,
            options,
            stats: Arc::new(CacheStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    // == Handle ==
    /// Answers one client request.
    ///
    /// Every response carries an `X-Cache` header naming the disposition.
    pub async fn handle(&self, request: OriginRequest) -> Result<OriginResponse> {
        let request_cc = CacheControl::from_request(&request.headers);
        let base = CacheKey::base(&request.method, &request.url);

        if !self.lookup_eligible(&request.method)
            || request_cc.no_store()
            || request.headers.contains_key(header::RANGE)
        {
            return self.bypass(request, base).await;
        }

        let lookup = self.lookup(&request, &base).await;
        let key = lookup.key;
        let now = Utc::now();

        let stored = lookup
            .entry
            .filter(|entry| self.may_serve_to(entry, &request.headers));

        let Some(entry) = stored else {
            if request_cc.only_if_cached() {
                return self.unsatisfiable(key);
            }
            return self.fetch(request, &request_cc, &base, key, None).await;
        };

        let freshness = Freshness::evaluate(&entry, now, self.options.shared, &self.options.heuristic);
        if freshness.satisfies(&request_cc) {
            let response = self.serve_stored(&entry, &freshness, Outcome::Hit, &[]);
            self.finish(key, Outcome::Hit, None, Some(freshness.age_secs()));
            return Ok(self.answer_client(&request, response));
        }

        if request_cc.only_if_cached() {
            return self.unsatisfiable(key);
        }

        // the stale entry stays as a fallback while the origin is contacted
        if entry.has_validators() {
            self.revalidate(request, &request_cc, &base, key, entry).await
        } else {
            self.fetch(request, &request_cc, &base, key, Some(entry))
                .await
        }
    }

    fn lookup_eligible(&self, method: &Method) -> bool {
        method == Method::GET || method == Method::HEAD || self.options.method_storable(method)
    }

    // Shared caches only answer requests carrying Authorization with entries
    // the origin explicitly marked as shareable.
    fn may_serve_to(&self, entry: &CacheEntry, request_headers: &HeaderMap) -> bool {
        if !self.options.shared || !request_headers.contains_key(header::AUTHORIZATION) {
            return true;
        }
        explicitly_shareable(&CacheControl::from_headers(&entry.headers))
    }

    // == Lookup ==
    // The base entry's Vary decides which key holds the servable variant.
    async fn lookup(&self, request: &OriginRequest, base: &CacheKey) -> Lookup {
        let Some(entry) = self.read(base).await else {
            return Lookup {
                key: base.clone(),
                entry: None,
            };
        };

        let vary = entry.vary();
        let key = CacheKey::build(&request.method, &request.url, Some(&vary), &request.headers);
        match vary {
            Vary::None => Lookup {
                key,
                entry: Some(entry),
            },
            Vary::Any => Lookup { key, entry: None },
            Vary::Headers(_) => {
                let entry = self.read(&key).await;
                Lookup { key, entry }
            }
        }
    }

    async fn read(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.store.get(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                self.stats.record_store_error();
                None
            }
        }
    }

    // == Bypass ==
    async fn bypass(&self, request: OriginRequest, base: CacheKey) -> Result<OriginResponse> {
        let unsafe_method = !request.method.is_safe() && !self.options.method_storable(&request.method);
        let invalidation = unsafe_method.then(|| (request.url.clone(), request.headers.clone()));

        let started = Instant::now();
        let mut response = self.forwarder.forward(request).await?;
        let latency = started.elapsed();

        if let Some((url, headers)) = invalidation {
            if response.status.is_success() || response.status.is_redirection() {
                self.invalidate(&url, &headers, &response.headers).await;
            }
        }

        set_disposition_header(&mut response.headers, Outcome::Bypass);
        self.finish(base, Outcome::Bypass, Some(latency), None);
        Ok(response)
    }

    // == Invalidation ==
    /// Removes entries for the request URL and any same-origin `Location`
    /// or `Content-Location` target.
    async fn invalidate(&self, url: &Url, request_headers: &HeaderMap, response_headers: &HeaderMap) {
        let mut targets = vec![url.clone()];
        for name in [header::LOCATION, header::CONTENT_LOCATION] {
            let Some(value) = response_headers.get(&name).and_then(|v| v.to_str().ok()) else {
                continue;
            };
            if let Ok(target) = url.join(value) {
                if target.origin() == url.origin() && !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }

        for target in &targets {
            for method in [Method::GET, Method::HEAD] {
                self.purge(&method, target, request_headers).await;
            }
        }
    }

    // Deletes a base key and the variant selected by `request_headers`.
    async fn purge(&self, method: &Method, url: &Url, request_headers: &HeaderMap) {
        let base = CacheKey::base(method, url);
        if let Some(entry) = self.read(&base).await {
            let vary = entry.vary();
            if let Vary::Headers(_) = vary {
                self.remove(&CacheKey::build(method, url, Some(&vary), request_headers))
                    .await;
            }
        }
        self.remove(&base).await;
    }

    async fn remove(&self, key: &CacheKey) {
        if let Err(e) = self.store.delete(key).await {
            warn!(key = %key, error = %e, "Cache delete failed");
            self.stats.record_store_error();
        } else {
            debug!(key = %key, "Cache entry removed");
        }
    }

    // == Revalidation ==
    async fn revalidate(
        &self,
        request: OriginRequest,
        request_cc: &CacheControl,
        base: &CacheKey,
        key: CacheKey,
        fallback: CacheEntry,
    ) -> Result<OriginResponse> {
        let mut conditional = request.clone();
        strip_client_conditionals(&mut conditional.headers);
        if let Some(value) = fallback.etag().and_then(|v| HeaderValue::from_str(v).ok()) {
            conditional.headers.insert(header::IF_NONE_MATCH, value);
        }
        if let Some(value) = fallback
            .last_modified()
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            conditional.headers.insert(header::IF_MODIFIED_SINCE, value);
        }

        debug!(key = %key, "Revalidating stale entry");
        let request_time = Utc::now();
        let started = Instant::now();
        let result = self.forwarder.forward(conditional).await;
        let latency = started.elapsed();
        let response_time = Utc::now();

        let response = match result {
            Ok(response) if response.status == StatusCode::NOT_MODIFIED => response,
            Ok(response) if !is_origin_error(response.status) => {
                return Ok(self
                    .complete_fetch(
                        &request,
                        request_cc,
                        base,
                        key,
                        response,
                        request_time,
                        response_time,
                        latency,
                        true,
                    )
                    .await);
            }
            outcome => {
                return self.stale_or_error(&request, request_cc, key, fallback, outcome, latency);
            }
        };

        let not_modified = HeaderList::from_header_map(&response.headers);
        let updated = fallback.revalidated(&not_modified, request_time, response_time);
        self.write(&key, updated.clone()).await;

        let freshness = Freshness::evaluate(
            &updated,
            Utc::now(),
            self.options.shared,
            &self.options.heuristic,
        );
        let served = self.serve_stored(&updated, &freshness, Outcome::Revalidated, &[]);
        self.finish(key, Outcome::Revalidated, Some(latency), Some(freshness.age_secs()));
        Ok(self.answer_client(&request, served))
    }

    // == Fetch ==
    /// Forwards a cache-populating request and stores the response when allowed.
    async fn fetch(
        &self,
        request: OriginRequest,
        request_cc: &CacheControl,
        base: &CacheKey,
        key: CacheKey,
        fallback: Option<CacheEntry>,
    ) -> Result<OriginResponse> {
        let mut forwarded = request.clone();
        strip_client_conditionals(&mut forwarded.headers);

        let request_time = Utc::now();
        let started = Instant::now();
        let result = self.forwarder.forward(forwarded).await;
        let latency = started.elapsed();
        let response_time = Utc::now();

        match (result, fallback) {
            (Ok(response), Some(fallback)) if is_origin_error(response.status) => {
                self.stale_or_error(&request, request_cc, key, fallback, Ok(response), latency)
            }
            (Err(e), Some(fallback)) => {
                self.stale_or_error(&request, request_cc, key, fallback, Err(e), latency)
            }
            (Ok(response), fallback) => Ok(self
                .complete_fetch(
                    &request,
                    request_cc,
                    base,
                    key,
                    response,
                    request_time,
                    response_time,
                    latency,
                    fallback.is_some(),
                )
                .await),
            (Err(e), None) => {
                debug!(key = %key, error = %e, "Origin fetch failed");
                self.finish(key, Outcome::Miss, Some(latency), None);
                Err(e)
            }
        }
    }

    // Stores a full origin response if allowed, then answers the client.
    // `replaces_stale` deletes the old entry when the new one cannot be stored.
    #[allow(clippy::too_many_arguments)]
    async fn complete_fetch(
        &self,
        request: &OriginRequest,
        request_cc: &CacheControl,
        base: &CacheKey,
        key: CacheKey,
        mut response: OriginResponse,
        request_time: DateTime<Utc>,
        response_time: DateTime<Utc>,
        latency: Duration,
        replaces_stale: bool,
    ) -> OriginResponse {
        let headers = HeaderList::from_header_map(&response.headers);
        let key = if self.storable(request, request_cc, response.status, &headers) {
            let entry = CacheEntry::new(
                response.status.as_u16(),
                headers,
                response.body.clone(),
                request_time,
                response_time,
            );
            self.publish(request, base, entry).await
        } else {
            if replaces_stale {
                self.remove(&key).await;
            }
            debug!(key = %key, status = %response.status, "Response not storable");
            key
        };

        set_disposition_header(&mut response.headers, Outcome::Miss);
        self.finish(key, Outcome::Miss, Some(latency), None);
        self.answer_client(request, response)
    }

    // == Storability ==
    fn storable(
        &self,
        request: &OriginRequest,
        request_cc: &CacheControl,
        status: StatusCode,
        response_headers: &HeaderList,
    ) -> bool {
        if !self.lookup_eligible(&request.method) || request_cc.no_store() {
            return false;
        }
        let cc = CacheControl::from_headers(response_headers);
        if cc.no_store() || !Vary::from_headers(response_headers).is_cacheable() {
            return false;
        }
        if self.options.shared {
            if cc.private() {
                return false;
            }
            if request.headers.contains_key(header::AUTHORIZATION) && !explicitly_shareable(&cc) {
                return false;
            }
        }
        HEURISTICALLY_CACHEABLE.contains(&status.as_u16())
            || cc.public()
            || self.options.status_storable(status)
    }

    // == Writes ==
    /// Stores `entry`, returning the key it is served from.
    ///
    /// A response with `Vary` is written under its variant key, and a
    /// header-only copy under the base key records the Vary declaration for
    /// later lookups.
    async fn publish(&self, request: &OriginRequest, base: &CacheKey, entry: CacheEntry) -> CacheKey {
        match entry.vary() {
            vary @ Vary::Headers(_) => {
                let key = CacheKey::build(&request.method, &request.url, Some(&vary), &request.headers);
                let marker = CacheEntry {
                    body: Bytes::new(),
                    ..entry.clone()
                };
                self.write(base, marker).await;
                self.write(&key, entry).await;
                key
            }
            _ => {
                self.write(base, entry).await;
                base.clone()
            }
        }
    }

    async fn write(&self, key: &CacheKey, entry: CacheEntry) {
        match self.store.set(key, entry).await {
            Ok(()) => debug!(key = %key, "Cache entry stored"),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache write failed");
                self.stats.record_store_error();
            }
        }
    }

    // == Stale on error ==
    fn stale_or_error(
        &self,
        request: &OriginRequest,
        request_cc: &CacheControl,
        key: CacheKey,
        fallback: CacheEntry,
        outcome: Result<OriginResponse>,
        latency: Duration,
    ) -> Result<OriginResponse> {
        // evaluated after the failed round trip so Age covers the origin latency
        let freshness = Freshness::evaluate(
            &fallback,
            Utc::now(),
            self.options.shared,
            &self.options.heuristic,
        );
        let permitted = freshness.permits_stale_on_error(request_cc, self.options.stale_if_error);

        match outcome {
            Ok(response) if !permitted => {
                // an origin error status is still a valid answer to relay
                let mut response = response;
                set_disposition_header(&mut response.headers, Outcome::Miss);
                self.finish(key, Outcome::Miss, Some(latency), None);
                Ok(self.answer_client(request, response))
            }
            Err(e) if !permitted => {
                debug!(key = %key, error = %e, "Origin failed, stale entry not permitted");
                self.finish(key, Outcome::Miss, Some(latency), None);
                Err(e)
            }
            outcome => {
                match &outcome {
                    Ok(response) => {
                        warn!(key = %key, status = %response.status, "Origin error, serving stale entry")
                    }
                    Err(e) => warn!(key = %key, error = %e, "Origin unreachable, serving stale entry"),
                }
                let served = self.serve_stored(
                    &fallback,
                    &freshness,
                    Outcome::StaleServed,
                    &[WARNING_REVALIDATION_FAILED],
                );
                self.finish(key, Outcome::StaleServed, Some(latency), Some(freshness.age_secs()));
                Ok(self.answer_client(request, served))
            }
        }
    }

    fn unsatisfiable(&self, key: CacheKey) -> Result<OriginResponse> {
        self.finish(key, Outcome::Miss, None, None);
        Err(CacheError::GatewayTimeout(
            "only-if-cached requested and no usable entry is stored".to_string(),
        ))
    }

    // == Responses ==
    /// Rebuilds a stored entry as a response with `Age` and `X-Cache`.
    fn serve_stored(
        &self,
        entry: &CacheEntry,
        freshness: &Freshness,
        outcome: Outcome,
        warnings: &[&str],
    ) -> OriginResponse {
        let mut headers = entry.headers.to_header_map();
        headers.insert(header::AGE, HeaderValue::from(freshness.age_secs()));
        if !freshness.is_fresh() {
            headers.append(header::WARNING, HeaderValue::from_static(WARNING_STALE));
        }
        for warning in warnings {
            if let Ok(value) = HeaderValue::from_str(warning) {
                headers.append(header::WARNING, value);
            }
        }
        if !headers.contains_key(header::DATE) {
            if let Ok(value) = HeaderValue::from_str(&fmt_http_date(entry.response_time)) {
                headers.insert(header::DATE, value);
            }
        }
        set_disposition_header(&mut headers, outcome);

        OriginResponse {
            status: entry.status_code(),
            headers,
            body: entry.body.clone(),
        }
    }

    /// Turns a successful GET/HEAD response into `304 Not Modified` when the
    /// client's own validators match it.
    fn answer_client(&self, request: &OriginRequest, response: OriginResponse) -> OriginResponse {
        let conditional_method = request.method == Method::GET || request.method == Method::HEAD;
        if !conditional_method || !response.status.is_success() {
            return response;
        }
        if !client_not_modified(&request.headers, &HeaderList::from_header_map(&response.headers)) {
            return response;
        }
        let mut headers = response.headers;
        headers.remove(header::CONTENT_LENGTH);
        OriginResponse {
            status: StatusCode::NOT_MODIFIED,
            headers,
            body: Bytes::new(),
        }
    }

    fn finish(&self, key: CacheKey, outcome: Outcome, origin_latency: Option<Duration>, age: Option<u64>) {
        self.stats.record(outcome);
        debug!(
            key = %key,
            outcome = %outcome,
            origin_latency_ms = origin_latency.map(|d| d.as_millis() as u64),
            age = age,
            "Request complete"
        );
        if let Some(observer) = &self.options.observer {
            observer.observe(&Disposition {
                key,
                outcome,
                origin_latency,
                age,
            });
        }
    }
}

fn explicitly_shareable(cc: &CacheControl) -> bool {
    cc.public() || cc.s_maxage().is_some() || cc.must_revalidate()
}

fn is_origin_error(status: StatusCode) -> bool {
    ORIGIN_ERROR_STATUSES.contains(&status.as_u16())
}

fn set_disposition_header(headers: &mut HeaderMap, outcome: Outcome) {
    headers.insert(X_CACHE, HeaderValue::from_static(outcome.header_value()));
}
