pub mod app;
pub mod domain;
pub mod endpoints;
pub mod error;
pub mod index;
pub mod metadata;
pub mod output;
pub mod state;
pub mod store;
pub mod transfer;
