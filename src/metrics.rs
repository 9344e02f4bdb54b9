use tracing::trace;

// Lightweight counters emitted as trace events only. They do not reach the
// Prometheus recorder, so `/metrics` does not show them; they are kept as
// plain tracing to avoid pulling metrics macros into every call site.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "motorval.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn cache_hit(cache: &'static str) {
    trace!(target = "motorval.metrics", cache = cache, "cache_hit_inc");
}

pub fn cache_miss(cache: &'static str) {
    trace!(target = "motorval.metrics", cache = cache, "cache_miss_inc");
}

pub fn upstream_call(upstream: &'static str, elapsed_ms: u128) {
    trace!(
        target = "motorval.metrics",
        upstream = upstream,
        elapsed_ms = elapsed_ms as u64,
        "upstream_call"
    );
}

pub fn fallback_served(aspect: &'static str) {
    trace!(
        target = "motorval.metrics",
        aspect = aspect,
        "fallback_served_inc"
    );
}

pub fn single_flight_joined() {
    trace!(target = "motorval.metrics", "single_flight_join_inc");
}
