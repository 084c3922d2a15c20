pub mod server;
pub mod tracing;

pub use server::{TestServer, captured_events, eventually};
pub use self::tracing::{CapturedEvent, init_test_tracing};
