pub mod agent;
pub mod backends;
pub mod cache;
pub mod config;
pub mod conversation;
pub mod message;
pub mod round;
pub mod token_source;
