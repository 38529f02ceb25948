//! LeekSaver sync engine: tiered ingestion and synchronization of A-share
//! market data into a local analytical store.
//!
//! Data flows `feed → rate gate → transform → store`; control flows
//! `schedule → job runtime → syncer`. The doctor audits the store daily and
//! feeds backfill work back into the runtime.

#![allow(clippy::float_cmp)]

pub mod cache;
pub mod config;
pub mod doctor;
pub mod error;
pub mod feed;
pub mod sched;
pub mod store;
pub mod sync;
pub mod transform;
