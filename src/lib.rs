pub mod cascade;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod logging;
pub mod metadata;
pub mod processor;
