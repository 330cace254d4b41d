pub mod bus;
mod read;
mod write;

pub use bus::{BUSError, Bus, Error, Transfer};
