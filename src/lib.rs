pub mod admission;
pub mod bank;
pub mod cheque;
pub mod common;
pub mod config;
pub mod fingerprint;
pub mod graph;
pub mod platform;
pub mod pprint;
pub mod store;
pub mod vocab;

pub use bank::{RlBank, ScheduleGenerator};
