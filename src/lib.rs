//! Loads a shared library at runtime, binds one exported `int(int)` entry
//! point and calls it with a handful of integers.
//!
//! Used to check that a library built elsewhere, possibly by another
//! language's toolchain, exports a C-callable function that a native
//! process can reach through the platform loader.

extern crate clap;
extern crate libc;
#[macro_use]
extern crate log;
extern crate shared_library;
extern crate thiserror;

pub mod binding;
pub mod config;
pub mod dl;
pub mod probe;

use std::path::PathBuf;

pub use config::{Binding, Config};
pub use probe::{run, Invocation};

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("dlopen failed: {message}")]
	Load { path: PathBuf, message: String },
	#[error("dlsym failed: {message}")]
	Resolve { symbol: String, message: String },
	#[error("dlclose failed: {0}")]
	Close(String),
	#[error("failed to write result: {0}")]
	Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, self::Error>;

impl Error {
	pub fn exit_code(&self) -> i32 {
		match self {
			Error::Load { .. } | Error::Resolve { .. } | Error::Close(_) | Error::Io(_) => 1,
		}
	}
}
