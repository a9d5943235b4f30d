pub mod api;
pub mod bignum;
pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod metrics;
pub mod poller;
pub mod progress;
pub mod ranking;
pub mod title;
