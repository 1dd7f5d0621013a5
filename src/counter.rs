//! Counter accumulation over parsed access log records.

use crate::accesslog::AccessLogRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Keys whose accumulator is a floating-point sum. Every other key counts.
const SUM_KEYS: &[&str] = &["response_time", "upstream_time"];

/// A single counter value.
///
/// Serializes as a bare JSON number so a [`CounterSet`] reads as a plain
/// `{"key": number}` object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Accumulator {
    Count(u64),
    Sum(f64),
}

impl Accumulator {
    /// The zero accumulator of the kind assigned to `key`.
    pub fn zero_for(key: &str) -> Self {
        if SUM_KEYS.contains(&key) {
            Accumulator::Sum(0.0)
        } else {
            Accumulator::Count(0)
        }
    }

    pub fn is_zero(&self) -> bool {
        match *self {
            Accumulator::Count(n) => n == 0,
            Accumulator::Sum(x) => x == 0.0,
        }
    }

    /// The value as a float, whatever its kind.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Accumulator::Count(n) => n as f64,
            Accumulator::Sum(x) => x,
        }
    }

    fn reset(&mut self) {
        *self = match self {
            Accumulator::Count(_) => Accumulator::Count(0),
            Accumulator::Sum(_) => Accumulator::Sum(0.0),
        };
    }
}

/// Counter dimension → accumulator.
pub type CounterSet = BTreeMap<String, Accumulator>;

/// Accumulates counters between flushes.
///
/// Every key has a fixed numeric kind (see [`Accumulator::zero_for`]), so the
/// order in which lines arrive never changes whether a key holds a count or a
/// sum. Resetting zeroes the values but keeps the keys.
#[derive(Debug, Default, Clone)]
pub struct Aggregator {
    counters: CounterSet,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one successfully parsed record into the counters.
    pub fn update(&mut self, record: &AccessLogRecord) {
        self.incr("total", 1);
        self.incr(&format!("method_{}", record.method), 1);
        self.incr(&format!("version:{}", record.http_version), 1);
        self.incr(&format!("status_{}", record.status_code), 1);

        let extra = &record.extra;

        if let Some(cache_status) = extra.get("cs").filter(|cs| !cs.is_empty()) {
            self.incr(&format!("cache_{cache_status}"), 1);
        }

        if let Some(rt) = extra.get("rt") {
            match parse_seconds(rt) {
                Some(seconds) => self.add("response_time", seconds),
                None => log::debug!("ignoring unparseable response time {rt:?}"),
            }
        }

        if let Some(ut) = extra.get("ut") {
            let tokens: Vec<&str> = ut.split(',').map(str::trim).collect();
            let mut parsed = 0u64;
            for token in &tokens {
                let Some(seconds) = parse_seconds(token) else {
                    continue;
                };
                self.add("upstream_time", seconds);
                self.incr("upstream", 1);
                parsed += 1;
            }
            if tokens.len() > 1 {
                self.incr("upstream_next", parsed.saturating_sub(1));
            }
        }
    }

    /// Count a line that could not be parsed.
    pub fn record_error(&mut self) {
        self.incr("errors", 1);
    }

    /// Copy of the current counters.
    pub fn snapshot(&self) -> CounterSet {
        self.counters.clone()
    }

    /// Borrow the current counters.
    pub fn counters(&self) -> &CounterSet {
        &self.counters
    }

    /// Zero every accumulator, keeping the keys.
    pub fn reset(&mut self) {
        for value in self.counters.values_mut() {
            value.reset();
        }
    }

    /// `true` when nothing has been accumulated since the last reset.
    pub fn is_empty(&self) -> bool {
        self.counters.values().all(Accumulator::is_zero)
    }

    fn entry(&mut self, key: &str) -> &mut Accumulator {
        self.counters
            .entry(key.to_string())
            .or_insert_with(|| Accumulator::zero_for(key))
    }

    fn incr(&mut self, key: &str, by: u64) {
        match self.entry(key) {
            Accumulator::Count(n) => *n += by,
            Accumulator::Sum(x) => *x += by as f64,
        }
    }

    fn add(&mut self, key: &str, by: f64) {
        match self.entry(key) {
            Accumulator::Sum(x) if (*x + by).is_finite() => *x += by,
            Accumulator::Sum(x) => {
                log::warn!("`{key}` would overflow at {x} + {by}, dropping the value");
            }
            Accumulator::Count(_) => {
                debug_assert!(false, "`{key}` counts, it cannot sum {by}");
            }
        }
    }
}

/// A finite duration in seconds; `nan` and `inf` are rejected.
fn parse_seconds(text: &str) -> Option<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|x| x.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_static() {
        assert_eq!(Accumulator::zero_for("response_time"), Accumulator::Sum(0.0));
        assert_eq!(Accumulator::zero_for("upstream_time"), Accumulator::Sum(0.0));
        assert_eq!(Accumulator::zero_for("upstream"), Accumulator::Count(0));
        assert_eq!(Accumulator::zero_for("status_200"), Accumulator::Count(0));
    }

    #[test]
    fn accumulators_serialize_as_numbers() {
        let mut set = CounterSet::new();
        set.insert("total".into(), Accumulator::Count(3));
        set.insert("response_time".into(), Accumulator::Sum(0.5));
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"{"response_time":0.5,"total":3}"#);
    }

    #[test]
    fn non_finite_durations_are_rejected() {
        assert_eq!(parse_seconds(" 0.25 "), Some(0.25));
        assert_eq!(parse_seconds("nan"), None);
        assert_eq!(parse_seconds("inf"), None);
        assert_eq!(parse_seconds("-Infinity"), None);
        assert_eq!(parse_seconds("1e999"), None);
    }
}
