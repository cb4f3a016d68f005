//! Core library for playlist-migrate
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod merge;
pub mod models;
pub mod normalize;
pub mod resolve;
pub mod retry;
pub mod sync;
