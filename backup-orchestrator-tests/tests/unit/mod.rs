//! Unit tests against the library's public API

mod config;
mod cron;
mod ledger;
mod retention;
