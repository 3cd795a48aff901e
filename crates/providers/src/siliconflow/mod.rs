pub mod catalog;
mod client;
pub mod config;

pub use client::{build_request_body, SiliconFlowClient, NO_ANSWER_FALLBACK};
