pub mod conf;
pub mod control;
pub mod hub;
pub mod idle;
pub mod ingest;
pub mod line;
pub mod logging;
pub mod metrics;
pub mod service;
pub mod source;
pub mod writer;
