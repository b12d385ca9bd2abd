pub mod batch;
pub mod config;
pub mod extractor;
pub mod fetcher;
pub mod resolver;
pub mod wall;
