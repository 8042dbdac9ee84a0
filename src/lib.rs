pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod expenses;
pub mod extraction;
pub mod intelligence;
pub mod jobs;
pub mod models;
pub mod routes;
pub mod s3;
pub mod schema;
pub mod state;
pub mod storage;
pub mod utils;
pub mod workers;

pub use workers::{default_handlers, Worker};
