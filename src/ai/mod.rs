//! Natural-language explanations, batch chat and risk reports backed by a
//! generative model.

pub mod client;
pub mod context;
pub mod prompts;
pub mod retry;
pub mod sanitize;
pub mod service;

pub use service::{Narrative, Narrator};
