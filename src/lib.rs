pub mod api;
pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod groups;
pub mod output;
pub mod session;
pub mod store;
pub mod views;
