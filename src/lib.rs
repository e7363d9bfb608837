pub mod archive;
pub mod config;
pub mod consumer;
pub mod db;
pub mod ingest;
pub mod isbndb;
pub mod limiter;
pub mod model;
pub mod quota;
