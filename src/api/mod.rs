// src/api/mod.rs
// HTTP entrypoint: one route exercising the Sequential Thinking Loop end to
// end, plus the health probes ops tooling expects.

pub mod http;
pub mod state;

pub use state::AppState;
