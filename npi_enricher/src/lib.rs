pub mod address;
pub mod args;
pub mod batch;
pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod npi;
pub mod server;
pub mod service;
pub mod spreadsheet;
pub mod storage;
pub mod store;
pub mod tasks;

pub use error::{Error, Result};
