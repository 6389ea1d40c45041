pub mod annotate;
pub mod build;
pub mod command;
pub mod common;
pub mod sort;
