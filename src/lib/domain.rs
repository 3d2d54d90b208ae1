//! Domain module

pub mod notifications;
