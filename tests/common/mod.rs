#![allow(dead_code)]

pub mod doubles;
pub mod fixtures;
pub mod strategies;

pub use doubles::*;
pub use fixtures::*;
