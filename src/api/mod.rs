//! High-level and raw API surfaces over the Kiro transport layer.

pub mod messages;
