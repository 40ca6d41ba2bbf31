//! Core domain types and logic.

pub mod error;
pub mod ohlcv;
pub mod indicator;
pub mod cache;
pub mod aligner;
pub mod features;
pub mod model;
pub mod ensemble;
pub mod position;
pub mod resource_manager;
pub mod decision;
pub mod cycle;
pub mod replay;
pub mod training;
pub mod engine_config;
pub mod config_validation;
