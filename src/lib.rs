pub mod auth;
pub mod config;
pub mod error;
pub mod history_sync;
pub mod pipeline;
pub mod rank;
pub mod reconcile;
pub mod service;
pub mod storage;
