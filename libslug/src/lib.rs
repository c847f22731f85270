#![doc = include_str!("../README.md")]

pub mod archive;
pub mod build;
pub mod buildpack;
pub mod compile;
pub mod digest;
pub mod fs;
pub mod http;
pub mod output;
pub mod prepare;
pub mod slugignore;
pub mod source;
pub mod write;

mod command;

pub use build::{Build, BuildRoot};
pub use compile::{compile, CompileError};
pub use prepare::{prepare, PrepareError};
