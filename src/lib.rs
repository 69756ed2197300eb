//! Switchboard: upstream connection orchestration for a tool-server proxy.
//!
//! This crate keeps live connections to many independent upstream servers,
//! tracks their health, protects the fleet from servers that keep failing
//! and keeps a user-facing status view current without rebuilding it on
//! every change.
//!
//! # Architecture
//!
//! Switchboard follows hexagonal architecture principles:
//!
//! - **Domain**: Server records, connection states and failure categories
//! - **Ports**: Abstract traits for connectors, stores and status views
//! - **Adapters**: In-memory and JSON file stores, a scripted connector
//!
//! # Modules
//!
//! - [`events`]: Typed event bus with bounded per-subscriber queues
//! - [`upstream`]: Connection state machines, failure policy and
//!   cross-store persistence
//! - [`sync`]: Debounced synchronization of the status view
//! - [`config`]: Orchestration tunables
//! - [`orchestrator`]: Wiring, start-up reconciliation and shutdown

pub mod config;
pub mod events;
pub mod orchestrator;
pub mod sync;
pub mod upstream;
