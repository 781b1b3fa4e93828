//! feedloop - a multi-user CLI RSS aggregator
//!
//! Users register feeds and follow them; the `agg` command polls feeds one
//! at a time, stalest first, and ingests their posts into a local database
//! idempotently.

pub mod commands;
pub mod config;
pub mod db;
pub mod fetcher;
pub mod poller;
