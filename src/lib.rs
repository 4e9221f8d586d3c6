//! Personal AI Newsroom
//!
//! Fetches RSS feeds, has a generative model write a dated briefing from
//! them, and serves the briefings through a small web UI. All state is kept
//! as JSON files in a GitHub repository.

pub mod config;
pub mod documents;
pub mod fetcher;
pub mod github;
pub mod pipeline;
pub mod routes;
pub mod session;
pub mod store;
pub mod summarizer;
