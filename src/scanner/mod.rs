//! Per-file intake stages that run before anything leaves the inbox:
//! walking, classification, ignore matching, stability and hashing.

pub mod classify;
pub mod hasher;
pub mod patterns;
pub mod stability;
pub mod walker;

#[cfg(test)]
mod test_properties;
