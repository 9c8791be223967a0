//! Fetch, parse, and store body-composition measurements from the Health
//! Planet innerscan pages.

pub mod db;
pub mod error;
pub mod models;
pub mod parse;
pub mod portal;
pub mod service;
pub mod session;

pub use error::SyncError;
