#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tracing_subscriber::EnvFilter;

use versioned_dict::{Fields, FixedClock, NestedFields, StoreConfig, Timestamp, fields};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("versioned_dict=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

/// 2024-12-13 23:04:`sec` UTC.
pub fn at(sec: u32) -> Timestamp {
    Utc.with_ymd_and_hms(2024, 12, 13, 23, 4, sec).unwrap()
}

pub fn fixed_config(sec: u32) -> (StoreConfig, Arc<FixedClock>) {
    let clock = FixedClock::shared(at(sec));
    let config = StoreConfig::default()
        .with_clock(clock.clone())
        .created_at(at(sec));
    (config, clock)
}

pub fn aux1() -> Fields {
    fields([("a1", 1.into()), ("a2", "ce".into())])
}

pub fn nested<'a>(records: impl IntoIterator<Item = (&'a str, Fields)>) -> NestedFields {
    records
        .into_iter()
        .map(|(k, f)| (k.to_string(), f))
        .collect()
}
