pub mod chunking;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod loader;
pub mod timestamps;
