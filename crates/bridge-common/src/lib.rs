//! Shared configuration for wire-bridge.

pub mod config;
