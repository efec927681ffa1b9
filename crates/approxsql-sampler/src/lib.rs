//! Engine adapter trait, sample builders and the engine-backed sample catalog.

mod builder;
mod catalog;
mod dbms;

pub use builder::{
    NULL_NUMBER_SENTINEL, NULL_STRING_SENTINEL, NULL_TIMESTAMP_SENTINEL, SampleBuilder,
    TempNames, TempTableGuard, UNIVERSE_BUCKETS, drop_samples, null_safe_key, stratum_budget,
    uniform_target_size, universe_threshold,
};
pub use catalog::{EngineCatalog, EngineRegistry};
pub use dbms::{Dbms, columns_query};
