//! Demo runner for the durable ticket checkout saga.
//!
//! Runs competing checkouts against in-memory services, with payment
//! outcomes delivered through the correlation broker the way a payment
//! webhook would deliver them.

pub mod config;
pub mod demo;
