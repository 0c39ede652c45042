#![crate_name = "qos_ofp"]
#![crate_type = "lib"]

mod bits;
pub mod classifier;
pub mod decision;
pub mod error;
pub mod learning;
pub mod ofp_controller;
pub mod ofp_header;
pub mod ofp_message;
pub mod openflow0x01;
pub mod packet;
pub mod policy;
pub mod programmer;
pub mod qos_switch;

pub use error::{Error, Result};
