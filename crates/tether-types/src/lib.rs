//! Core types and traits for the tether event relay.
//!
//! This crate defines the data structures shared by the wire protocol, the
//! local action runtime and the command-line front end. It contains no I/O.

pub mod action;
pub mod config;
pub mod error;
pub mod event;
