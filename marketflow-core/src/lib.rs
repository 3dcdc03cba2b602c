//! MarketFlow Core: dataset engine for OHLCV market data.
//!
//! This crate contains:
//! - Domain types (term index, symbol metadata, intervals, flows, datasets)
//! - The merge engine, which folds new points into an immutable base dataset
//! - The download/fill scheduler and the aggregate operation
//! - The CoinAPI source and delimited-file ingestion
//! - Storage, pruning and the human-readable report

pub mod config;
pub mod data;
pub mod diagnostics;
pub mod domain;
pub mod merge;
pub mod prune;
pub mod report;
pub mod schedule;
pub mod storage;
