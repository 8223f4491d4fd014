//! Health checks run against candidate proxies
//!
//! - `template`: random-value tokens in check requests
//! - `rules`: compiled response patterns shared with the refresher
//! - `executor`: issues one probe and judges the response

pub mod executor;
pub mod rules;
pub mod template;

pub use executor::{build_probe_client, evaluate, run_check};
pub use rules::{CheckRules, CompiledCheck, FALLBACK_OUTER_IP};
