//! Boxcall CLI - provision call images and inspect remote call results.

pub mod commands;
