#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod paths;
pub mod process;
pub mod qemu;
pub mod qmp;
pub mod registry;
pub mod util;
pub mod vm;
