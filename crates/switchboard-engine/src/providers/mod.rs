//! Built-in capability providers.

pub mod weather;
