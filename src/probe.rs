use std::io::Write;

use super::binding::{self, Entry, IntFn};
use super::config::{Binding, Config};
#[cfg(unix)]
use super::dl::DlProcLoader;
use super::dl::{ProcLoader, SharedLibraryLoader};
use super::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Invocation {
	pub arg: i32,
	pub result: i32,
}

fn open(config: &Config) -> Result<Box<dyn ProcLoader>> {
	match config.binding {
		#[cfg(unix)]
		Binding::Now => Ok(Box::new(DlProcLoader::open(
			&config.library,
			config.visibility(),
		)?)),
		#[cfg(not(unix))]
		Binding::Now => Ok(Box::new(SharedLibraryLoader::open(&config.library)?)),
		Binding::Lazy => {
			if config.global {
				warn!("--global has no effect with lazy binding");
			}
			Ok(Box::new(SharedLibraryLoader::open(&config.library)?))
		}
	}
}

fn invoke_all<W: Write>(
	loader: &dyn ProcLoader,
	config: &Config,
	out: &mut W,
) -> Result<Vec<Invocation>> {
	for name in &config.required {
		loader.get_proc_addr(name)?;
		debug!("required export `{}` present", name);
	}

	// Safety: an `int(int)` export under this name is the contract the
	// library under test is checked against.
	let entry: Entry<IntFn> = unsafe { binding::bind(loader, &config.symbol)? };

	let mut invocations = Vec::with_capacity(config.args.len());
	for &arg in &config.args {
		let result = entry.call(arg);
		writeln!(out, "Result from {}({}): {}", entry.name(), arg, result)?;
		invocations.push(Invocation { arg, result });
	}
	out.flush()?;
	Ok(invocations)
}

fn release(loader: Box<dyn ProcLoader>, keep_loaded: bool) {
	if keep_loaded {
		info!("leaving {} loaded", loader.path().display());
		loader.leak();
		return;
	}
	let path = loader.path().to_path_buf();
	if let Err(e) = loader.close() {
		warn!("{}: {}", path.display(), e);
	}
}

/// Opens the configured library, calls its entry point once per argument
/// and writes one line per call to `out`.
///
/// The library is released on every path once it has been opened, unless
/// `keep_loaded` asks otherwise.
pub fn run<W: Write>(config: &Config, out: &mut W) -> Result<Vec<Invocation>> {
	let loader = open(config)?;
	info!(
		"opened {} ({:?} binding)",
		loader.path().display(),
		config.binding
	);
	let invocations = invoke_all(&*loader, config, out);
	release(loader, config.keep_loaded);
	invocations
}
