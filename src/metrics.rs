use prometheus::{
    register_gauge, register_histogram, register_int_counter_vec, Encoder, Gauge, Histogram,
    IntCounterVec, TextEncoder,
};
use lazy_static::lazy_static;

lazy_static! {
    pub static ref LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "resolver_lookups_total",
        "Counter of lookups served, by where the answer came from.",
        &["source"]
    ).unwrap();

    pub static ref UPSTREAM_QUERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "resolver_upstream_queries_total",
        "Counter of queries sent to name servers while walking the delegation tree.",
        &["qtype", "result"]
    ).unwrap();

    pub static ref LOOKUP_DURATION: Histogram = register_histogram!(
        "resolver_lookup_duration_seconds",
        "Histogram of the time (in seconds) each uncached lookup took.",
        vec![0.004, 0.008, 0.016, 0.032, 0.064, 0.128, 0.256, 0.512, 1.024, 2.048, 4.096, 8.192, 16.384]
    ).unwrap();

    pub static ref CACHE_ENTRIES: Gauge = register_gauge!(
        "resolver_cache_entries",
        "The number of domains held in the answer cache."
    ).unwrap();

    pub static ref CACHE_EVICTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "resolver_cache_evictions_total",
        "Counter of answer cache evictions, by reason.",
        &["reason"]
    ).unwrap();
}

/// Renders every registered metric in the Prometheus text format.
pub fn gather_text() -> anyhow::Result<Vec<u8>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(buffer)
}

pub fn content_type() -> String {
    TextEncoder::new().format_type().to_string()
}
