//! Market-value lookups: at most one provider call in flight per vehicle,
//! successful answers cached for the long TTL class and written through to
//! the record store. Failures are handed to every waiter and never cached.

pub mod provider;
pub mod store;

pub use provider::{DisabledProvider, HttpValuationProvider, Quote, ValuationProvider};
pub use store::{JsonFileStore, MemoryStore, RecordStore, RedisStore, StoreError, open_store};

use crate::cache::{Clock, TtlCache};
use crate::debounce::Debouncer;
use crate::error::LookupError;
use crate::models::{LookupOptions, MarketValue, MarketValueRecord, ValuationRequest, VehicleKey};
use crate::singleflight::{Flight, SingleFlight};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

type Settled = Result<(Arc<MarketValueRecord>, bool), LookupError>;

pub struct MarketValueService {
    provider: Arc<dyn ValuationProvider>,
    cache: Arc<TtlCache<Arc<MarketValueRecord>>>,
    store: Arc<dyn RecordStore>,
    flights: SingleFlight<VehicleKey, Settled>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    debounce: Duration,
}

impl MarketValueService {
    pub fn new(
        provider: Arc<dyn ValuationProvider>,
        cache: Arc<TtlCache<Arc<MarketValueRecord>>>,
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        debounce: Duration,
    ) -> Self {
        Self {
            provider,
            cache,
            store,
            flights: SingleFlight::new(),
            clock,
            ttl,
            debounce,
        }
    }

    pub fn cache(&self) -> &Arc<TtlCache<Arc<MarketValueRecord>>> {
        &self.cache
    }

    /// A debounced lookup stream for one form. Sessions never supersede
    /// each other; they still share the cache and in-flight requests.
    pub fn session(self: &Arc<Self>) -> ValuationSession {
        ValuationSession {
            service: Arc::clone(self),
            debouncer: Debouncer::new(self.debounce),
        }
    }

    /// Loads persisted records into the cache with their original fetch
    /// time, so records older than the TTL are never served. Returns how
    /// many records were loaded.
    pub async fn hydrate(&self) -> usize {
        let records = match self.store.load_all().await {
            Ok(records) => records,
            Err(err) => {
                warn!(target = "motorval.market", error = %err, "record store load failed");
                return 0;
            }
        };
        let loaded = records.len();
        for record in records {
            let fetched_at = record.fetched_at_epoch_ms;
            self.cache
                .set_fetched_at(record.key.to_string(), Arc::new(record), self.ttl, fetched_at);
        }
        info!(target = "motorval.market", loaded, "hydrated market values");
        loaded
    }

    /// `force_refresh` skips the cache read but leaves the cached record in
    /// place until a fresh one replaces it, so a failed refresh keeps
    /// serving the previous value to everyone else.
    pub async fn get_market_value(
        &self,
        request: &ValuationRequest,
        options: LookupOptions,
    ) -> Result<MarketValue, LookupError> {
        let key = request.key(self.clock.current_year())?;
        if !options.force_refresh
            && let Some(record) = self.cache.get(&key.to_string())
        {
            return Ok(MarketValue {
                record,
                cached: true,
            });
        }

        let fetch = Fetch {
            provider: self.provider.clone(),
            cache: self.cache.clone(),
            store: self.store.clone(),
            clock: self.clock.clone(),
            ttl: self.ttl,
            key: key.clone(),
            request: request.clone(),
            force: options.force_refresh,
        };
        let flight = self.flights.run(key.clone(), move || fetch.run()).await;
        if flight.joined() {
            debug!(target = "motorval.market", key = %key, "joined in-flight valuation");
        }
        match flight {
            Flight::Led(settled) | Flight::Joined(settled) => {
                settled.map(|(record, cached)| MarketValue { record, cached })
            }
            Flight::Abandoned => Err(LookupError::Abandoned),
        }
    }

    /// Empties the cache and the persisted snapshot.
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        if let Err(err) = self.store.clear().await {
            warn!(target = "motorval.market", error = %err, "record store clear failed");
        }
    }
}

/// One form's debounced view of the market-value service. Clones share the
/// same debounce window.
#[derive(Clone)]
pub struct ValuationSession {
    service: Arc<MarketValueService>,
    debouncer: Debouncer,
}

impl ValuationSession {
    /// Waits out the debounce window first; a call overtaken by a newer one
    /// from the same session resolves to `Ok(None)` without touching the
    /// provider. Validation still fails immediately.
    pub async fn lookup_debounced(
        &self,
        request: &ValuationRequest,
        options: LookupOptions,
    ) -> Result<Option<MarketValue>, LookupError> {
        let key = request.key(self.service.clock.current_year())?;
        if self.debouncer.settle(key).await.is_none() {
            return Ok(None);
        }
        self.service.get_market_value(request, options).await.map(Some)
    }
}

/// Everything the leader's valuation needs, owned so it can run on its own
/// task.
struct Fetch {
    provider: Arc<dyn ValuationProvider>,
    cache: Arc<TtlCache<Arc<MarketValueRecord>>>,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    key: VehicleKey,
    request: ValuationRequest,
    force: bool,
}

impl Fetch {
    async fn run(self) -> Settled {
        let Fetch {
            provider,
            cache,
            store,
            clock,
            ttl,
            key,
            request,
            force,
        } = self;
        // another flight may have settled between our cache miss and
        // becoming leader
        if !force && let Some(record) = cache.get(&key.to_string()) {
            return Ok((record, true));
        }

        let started = Instant::now();
        let quote = provider.value(&key, &request).await.map_err(|err| {
            warn!(target = "motorval.market", key = %key, error = %err, "valuation failed");
            LookupError::from(err)
        })?;
        let record = Arc::new(MarketValueRecord {
            key: key.clone(),
            low: quote.low,
            avg: quote.avg,
            high: quote.high,
            currency: quote.currency,
            source: quote.source,
            fetched_at_epoch_ms: clock.now_ms(),
        });
        cache.set(key.to_string(), record.clone(), ttl);
        if let Err(err) = store.put(&record).await {
            warn!(target = "motorval.market", key = %key, error = %err, "record store write failed");
        }
        info!(
            target = "motorval.market",
            key = %key,
            avg = record.avg,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "valuation settled"
        );
        Ok((record, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::error::{ErrorClass, UpstreamError};
    use crate::models::ValuationSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // 2026-03-01T00:00:00Z
    const NOW_MS: i64 = 1_772_323_200_000;
    const TTL: Duration = Duration::from_secs(4 * 3600);

    type Script = Box<dyn Fn(usize) -> Result<Quote, UpstreamError> + Send + Sync>;

    struct FakeProvider {
        calls: AtomicUsize,
        delay: Duration,
        script: Script,
    }

    impl FakeProvider {
        fn new(
            delay: Duration,
            script: impl Fn(usize) -> Result<Quote, UpstreamError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                script: Box::new(script),
            })
        }

        fn quoting(avg: f64) -> Arc<Self> {
            Self::new(Duration::ZERO, move |_| Ok(quote(avg)))
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ValuationProvider for FakeProvider {
        async fn value(
            &self,
            _key: &VehicleKey,
            _request: &ValuationRequest,
        ) -> Result<Quote, UpstreamError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            (self.script)(call)
        }
    }

    fn quote(avg: f64) -> Quote {
        Quote {
            low: avg - 1_000.0,
            avg,
            high: avg + 1_000.0,
            currency: "USD".into(),
            source: ValuationSource::Api,
        }
    }

    fn throttled() -> UpstreamError {
        UpstreamError::RateLimited {
            retry_after_secs: Some(30),
            body: String::new(),
        }
    }

    struct Harness {
        service: Arc<MarketValueService>,
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
    }

    fn harness(provider: Arc<FakeProvider>, debounce: Duration) -> Harness {
        let clock = Arc::new(ManualClock::at(NOW_MS));
        let store = Arc::new(MemoryStore::default());
        let cache = Arc::new(TtlCache::new("market", clock.clone() as Arc<dyn Clock>));
        let service = MarketValueService::new(
            provider,
            cache,
            store.clone(),
            clock.clone(),
            TTL,
            debounce,
        );
        Harness {
            service: Arc::new(service),
            clock,
            store,
        }
    }

    fn audi_a3() -> ValuationRequest {
        ValuationRequest::new("Audi", "A3", 2020)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_lookups_share_one_provider_call() {
        let provider = FakeProvider::new(Duration::from_millis(50), |_| Ok(quote(21_500.0)));
        let h = harness(provider.clone(), Duration::ZERO);

        let spellings = [("Audi", "A3"), ("AUDI", " a3 "), ("audi", "A3")];
        let mut handles = Vec::new();
        for i in 0..9 {
            let service = h.service.clone();
            let (make, model) = spellings[i % spellings.len()];
            let request = ValuationRequest::new(make, model, 2020);
            handles.push(tokio::spawn(async move {
                service
                    .get_market_value(&request, LookupOptions::default())
                    .await
            }));
        }
        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(provider.calls(), 1);
        assert!(values.iter().all(|v| Arc::ptr_eq(&v.record, &values[0].record)));
        assert!(values.iter().all(|v| !v.cached));
        assert_eq!(values[0].record.key.to_string(), "audi|a3|2020");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_failure_reaches_every_waiter() {
        let provider = FakeProvider::new(Duration::from_millis(50), |_| Err(throttled()));
        let h = harness(provider.clone(), Duration::ZERO);

        let lookups = (0..4).map(|_| {
            let service = h.service.clone();
            tokio::spawn(async move {
                service
                    .get_market_value(&audi_a3(), LookupOptions::default())
                    .await
            })
        });
        for handle in lookups.collect::<Vec<_>>() {
            let err = handle.await.unwrap().unwrap_err();
            assert_eq!(err.class(), ErrorClass::RateLimited);
        }
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn second_lookup_within_ttl_is_cached() {
        let provider = FakeProvider::quoting(21_500.0);
        let h = harness(provider.clone(), Duration::ZERO);

        let first = h
            .service
            .get_market_value(&audi_a3(), LookupOptions::default())
            .await
            .unwrap();
        assert!(!first.cached);

        h.clock.advance(Duration::from_secs(4 * 3600 - 60));
        let second = h
            .service
            .get_market_value(&audi_a3(), LookupOptions::default())
            .await
            .unwrap();
        assert!(second.cached);
        assert!(Arc::ptr_eq(&first.record, &second.record));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn expired_record_is_fetched_again() {
        let provider = FakeProvider::quoting(21_500.0);
        let h = harness(provider.clone(), Duration::ZERO);
        h.service
            .get_market_value(&audi_a3(), LookupOptions::default())
            .await
            .unwrap();
        h.clock.advance(TTL);
        let again = h
            .service
            .get_market_value(&audi_a3(), LookupOptions::default())
            .await
            .unwrap();
        assert!(!again.cached);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn rate_limit_is_not_cached() {
        let provider = FakeProvider::new(Duration::ZERO, |call| {
            if call == 0 { Err(throttled()) } else { Ok(quote(21_500.0)) }
        });
        let h = harness(provider.clone(), Duration::ZERO);

        let err = h
            .service
            .get_market_value(&audi_a3(), LookupOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::RateLimited);
        assert_eq!(err.retry_after_secs(), Some(30));
        assert!(h.service.cache().get("audi|a3|2020").is_none());
        assert!(h.store.load_all().await.unwrap().is_empty());

        let retry = h
            .service
            .get_market_value(&audi_a3(), LookupOptions::default())
            .await
            .unwrap();
        assert!(!retry.cached);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn force_refresh_bypasses_cache() {
        let provider = FakeProvider::new(Duration::ZERO, |call| Ok(quote(20_000.0 + call as f64)));
        let h = harness(provider.clone(), Duration::ZERO);
        h.service
            .get_market_value(&audi_a3(), LookupOptions::default())
            .await
            .unwrap();
        let refreshed = h
            .service
            .get_market_value(&audi_a3(), LookupOptions { force_refresh: true })
            .await
            .unwrap();
        assert!(!refreshed.cached);
        assert_eq!(refreshed.record.avg, 20_001.0);
        assert_eq!(provider.calls(), 2);

        let cached = h
            .service
            .get_market_value(&audi_a3(), LookupOptions::default())
            .await
            .unwrap();
        assert_eq!(cached.record.avg, 20_001.0);
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_provider() {
        let provider = FakeProvider::quoting(1.0);
        let h = harness(provider.clone(), Duration::ZERO);
        for request in [
            ValuationRequest::new("Audi", "A3", "abc"),
            ValuationRequest::new("", "A3", 2020),
            ValuationRequest::new("Audi", " ", 2020),
            ValuationRequest::new("Audi", "A3", 1850),
        ] {
            let err = h
                .service
                .get_market_value(&request, LookupOptions::default())
                .await
                .unwrap_err();
            assert_eq!(err.class(), ErrorClass::InvalidInput);
        }
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn success_is_written_through_to_store() {
        let h = harness(FakeProvider::quoting(21_500.0), Duration::ZERO);
        h.service
            .get_market_value(&audi_a3(), LookupOptions::default())
            .await
            .unwrap();
        let stored = h.store.load_all().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].fetched_at_epoch_ms, NOW_MS);

        h.service.clear().await;
        assert!(h.service.cache().is_empty());
        assert!(h.store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hydrate_keeps_original_fetch_time() {
        let provider = FakeProvider::quoting(30_000.0);
        let h = harness(provider.clone(), Duration::ZERO);
        let persisted = |model: &str, age: Duration| MarketValueRecord {
            key: VehicleKey::new("Audi", model, 2020).unwrap(),
            low: 1.0,
            avg: 2.0,
            high: 3.0,
            currency: "USD".into(),
            source: ValuationSource::Scrape,
            fetched_at_epoch_ms: NOW_MS - age.as_millis() as i64,
        };
        h.store
            .put(&persisted("A3", Duration::from_secs(3600)))
            .await
            .unwrap();
        h.store
            .put(&persisted("A4", Duration::from_secs(5 * 3600)))
            .await
            .unwrap();

        assert_eq!(h.service.hydrate().await, 2);

        let fresh = h
            .service
            .get_market_value(&audi_a3(), LookupOptions::default())
            .await
            .unwrap();
        assert!(fresh.cached);
        assert_eq!(fresh.record.avg, 2.0);

        let stale = h
            .service
            .get_market_value(&ValuationRequest::new("Audi", "A4", 2020), LookupOptions::default())
            .await
            .unwrap();
        assert!(!stale.cached);
        assert_eq!(stale.record.avg, 30_000.0);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_serving_previous_record() {
        let provider = FakeProvider::new(Duration::ZERO, |call| {
            if call == 0 { Ok(quote(21_500.0)) } else { Err(throttled()) }
        });
        let h = harness(provider.clone(), Duration::ZERO);
        let original = h
            .service
            .get_market_value(&audi_a3(), LookupOptions::default())
            .await
            .unwrap();

        let err = h
            .service
            .get_market_value(&audi_a3(), LookupOptions { force_refresh: true })
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::RateLimited);

        let after = h
            .service
            .get_market_value(&audi_a3(), LookupOptions::default())
            .await
            .unwrap();
        assert!(after.cached);
        assert!(Arc::ptr_eq(&after.record, &original.record));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_leader_still_populates_cache() {
        let provider = FakeProvider::new(Duration::from_millis(200), |_| Ok(quote(21_500.0)));
        let h = harness(provider.clone(), Duration::ZERO);

        let service = h.service.clone();
        let leader = tokio::spawn(async move {
            service
                .get_market_value(&audi_a3(), LookupOptions::default())
                .await
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        let service = h.service.clone();
        let waiter = tokio::spawn(async move {
            service
                .get_market_value(&audi_a3(), LookupOptions::default())
                .await
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        leader.abort();

        let value = waiter.await.unwrap().unwrap();
        assert_eq!(value.record.avg, 21_500.0);
        assert!(h.service.cache().get("audi|a3|2020").is_some());
        assert_eq!(h.store.load_all().await.unwrap().len(), 1);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_lookups_coalesce_to_final_key() {
        let provider = FakeProvider::quoting(21_500.0);
        let h = harness(provider.clone(), Duration::from_millis(400));
        let session = h.service.session();

        let mut handles = Vec::new();
        for model in ["A", "A3", "A3 Sportback"] {
            let session = session.clone();
            let request = ValuationRequest::new("Audi", model, 2020);
            handles.push(tokio::spawn(async move {
                session
                    .lookup_debounced(&request, LookupOptions::default())
                    .await
            }));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap().unwrap());
        }

        assert!(outcomes[0].is_none());
        assert!(outcomes[1].is_none());
        let last = outcomes[2].as_ref().unwrap();
        assert_eq!(last.record.key.model(), "a3 sportback");
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_sessions_do_not_supersede_each_other() {
        let provider = FakeProvider::quoting(21_500.0);
        let h = harness(provider.clone(), Duration::from_millis(400));

        let first = h.service.session();
        let a = tokio::spawn(async move {
            first
                .lookup_debounced(&audi_a3(), LookupOptions::default())
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = h.service.session();
        let b = tokio::spawn(async move {
            second
                .lookup_debounced(
                    &ValuationRequest::new("Ford", "Mustang", 1967),
                    LookupOptions::default(),
                )
                .await
        });

        let a = a.await.unwrap().unwrap().unwrap();
        let b = b.await.unwrap().unwrap().unwrap();
        assert_eq!(a.record.key.to_string(), "audi|a3|2020");
        assert_eq!(b.record.key.to_string(), "ford|mustang|1967");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_lookup_rejects_bad_input_without_waiting() {
        let h = harness(FakeProvider::quoting(1.0), Duration::from_secs(10));
        let started = tokio::time::Instant::now();
        let err = h
            .service
            .session()
            .lookup_debounced(
                &ValuationRequest::new("Audi", "A3", "soon"),
                LookupOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvalidInput);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
