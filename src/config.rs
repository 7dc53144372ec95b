use clap::{Parser, ValueEnum};
use log::LevelFilter;
use std::path::PathBuf;

use super::dl::Visibility;

pub const DEFAULT_LIBRARY: &str = "./TestExport.so";
pub const DEFAULT_SYMBOL: &str = "PrintCS";
pub const DEFAULT_ARGS: [i32; 2] = [123, 76];

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Binding {
	/// Resolve every relocation when the library is opened
	Now,
	/// Defer relocations to first use
	Lazy,
}

/// Loads a shared library and calls one exported `int(int)` function.
#[derive(Parser, Clone, Debug)]
#[command(name = "dlcheck", version)]
pub struct Config {
	/// Shared library to load
	#[arg(env = "DLCHECK_LIBRARY", default_value = DEFAULT_LIBRARY)]
	pub library: PathBuf,

	/// Exported entry point to call
	#[arg(short, long, env = "DLCHECK_SYMBOL", default_value = DEFAULT_SYMBOL)]
	pub symbol: String,

	/// Argument for one call; repeat for more calls
	#[arg(
		short = 'a',
		long = "arg",
		value_name = "INT",
		allow_negative_numbers = true,
		default_values_t = DEFAULT_ARGS
	)]
	pub args: Vec<i32>,

	/// When relocations are resolved
	#[arg(long, value_enum, default_value_t = Binding::Now)]
	pub binding: Binding,

	/// Open with RTLD_GLOBAL (immediate binding only)
	#[arg(long)]
	pub global: bool,

	/// Leave the library loaded until the process exits
	#[arg(long)]
	pub keep_loaded: bool,

	/// Export that must be present before anything is called
	#[arg(long = "require", value_name = "SYMBOL")]
	pub required: Vec<String>,

	/// Log at debug level (RUST_LOG overrides)
	#[arg(short, long)]
	pub verbose: bool,
}

impl Config {
	pub fn visibility(&self) -> Visibility {
		if self.global {
			Visibility::Global
		} else {
			Visibility::Local
		}
	}

	pub fn log_level(&self) -> LevelFilter {
		if self.verbose {
			LevelFilter::Debug
		} else {
			LevelFilter::Warn
		}
	}
}
