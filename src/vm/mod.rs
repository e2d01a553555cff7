//! VM management modules

pub mod config;
pub mod defaults;
pub mod define;
pub mod disk;
pub mod manager;
pub mod network;

pub use manager::{ControlAction, VBox, VmField};
pub use network::NetworkInventory;
