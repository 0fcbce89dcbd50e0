// Library exports for the PawScan admin console
// Integration tests build the router from here

pub mod auth;
pub mod config;
pub mod console;
pub mod dashboard;
pub mod error;
pub mod extractors;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;
