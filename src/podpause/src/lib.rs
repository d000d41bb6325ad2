pub mod admission;
pub mod args;
pub mod controller;
pub mod model;
pub mod namespaces;
pub mod pause_logic;
pub mod pods;
pub mod policy;
pub mod profile;
pub mod store;

pub use controller::*;

#[cfg(test)]
pub mod fixtures;
