pub mod aggregate;
pub mod app;
pub mod build;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod event;
pub mod genbank;
pub mod ncbi;
pub mod otu;
pub mod output;
pub mod pipeline;
pub mod projector;
pub mod repo;
pub mod store;
