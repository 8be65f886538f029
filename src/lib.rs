//! Nodeboot — per-node boot coordinator for a gossip-clustered
//! key-value store.
//!
//! Runs once at node boot and once at node shutdown, driving the
//! locally-supervised cluster agent through trust-building,
//! quorum-verification and encryption-key-management steps so a freshly
//! provisioned machine joins (or originates) a cluster without a human
//! in the loop, and leaves cleanly without damaging quorum for the
//! survivors. Every call targets the local agent's loopback HTTP or RPC
//! endpoint; the coordinator never speaks to remote nodes directly.

pub mod agent;
pub mod bootstrap;
pub mod config;
pub mod controller;
pub mod errors;
pub mod keys;
pub mod ops;
pub mod provision;
pub mod retry;
pub mod runner;
