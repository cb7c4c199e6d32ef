//! HTTP text-generation service around a single pretrained causal LM
//! (distilgpt2 by default), guarded by a static API key.

pub mod api;
pub mod config;
pub mod error;
pub mod inference;
