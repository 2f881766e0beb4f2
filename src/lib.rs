// Library for tests to access modules

pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
pub mod query;
pub mod routes;
pub mod scheduler;
pub mod stats_repo;
pub mod version;
