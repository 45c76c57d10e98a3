pub mod batch;
pub mod config;
pub mod db;
pub mod ingest;
pub mod link;
pub mod sensor;
