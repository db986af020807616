//! Bus arrival estimation from periodically refreshed transit feeds.
//!
//! Vehicle positions, stops and schedules are fetched on independent timers
//! and swapped into a [`store::FeedStore`] as whole snapshots. A rider query
//! ([`search::search`]) finds stops near the rider, estimates how far and how
//! soon each nearby bus is, and returns at most one ranked row per line.

pub mod config;
pub mod estimate;
pub mod feed;
pub mod fetch;
pub mod geo;
pub mod locator;
pub mod output;
pub mod ranking;
pub mod refresh;
pub mod search;
pub mod session;
pub mod store;
pub mod traffic;
