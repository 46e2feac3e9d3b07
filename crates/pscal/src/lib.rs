pub mod config;
pub mod db;
pub mod error;
pub mod schedule;
pub mod server;
pub mod term;

pub use config::ServiceConfig;
pub use error::{FeedError, IncompleteFeed};
