//! Presentation helpers for the console front ends

pub mod console;

pub use console::{format_event, Command, Console, Flow, Selection};
