//! Listing availability verification.
//!
//! Calls the agent behind a property listing through a voice-AI telephony
//! provider, classifies the transcript and records whether the property is still
//! on the market. Jobs run on an in-process queue with bounded concurrency.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
