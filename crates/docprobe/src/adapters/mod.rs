//! Real model adapters behind the engine's [`ModelAdapter`] contract.
//!
//! [`CliModelAdapter`] drives a local CLI model as a subprocess;
//! [`HttpModelAdapter`] talks to an OpenAI-style chat completions
//! endpoint. Both keep a per-(document, model) transcript so every query
//! carries the full session context.
//!
//! [`ModelAdapter`]: comprehension::session::ModelAdapter

mod cli;
mod http;

pub use cli::CliModelAdapter;
pub use http::HttpModelAdapter;
