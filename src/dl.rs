use libc::c_void;
use shared_library::dynamic_library::DynamicLibrary;
use std::ffi::CString;
use std::path::{Path, PathBuf};

use super::{Error, Result};

pub type LibPtr = *const c_void;

/// A loaded module that can hand out addresses of its exports.
///
/// Dropping a loader releases the module. `close` does the same but reports
/// the outcome, `leak` keeps the module mapped until the process exits.
pub trait ProcLoader {
	fn path(&self) -> &Path;

	/// Looks up `s` and returns its address. A null address with a clean
	/// error channel is a legitimate null-valued symbol and is returned as is.
	fn get_proc_addr(&self, s: &str) -> Result<LibPtr>;

	fn close(self: Box<Self>) -> Result<()>;

	fn leak(self: Box<Self>) {
		std::mem::forget(self)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
	Local,
	Global,
}

fn library_path(lib_path: &Path) -> Result<CString> {
	#[cfg(unix)]
	let bytes = {
		use std::os::unix::ffi::OsStrExt;
		lib_path.as_os_str().as_bytes().to_vec()
	};
	#[cfg(not(unix))]
	let bytes = lib_path.to_string_lossy().into_owned().into_bytes();

	CString::new(bytes).map_err(|e| Error::Load {
		path: lib_path.to_path_buf(),
		message: format!("{}: {}", lib_path.display(), e),
	})
}

fn symbol_name(s: &str) -> Result<CString> {
	CString::new(s).map_err(|e| Error::Resolve {
		symbol: s.to_string(),
		message: format!("invalid symbol name `{}`: {}", s.escape_debug(), e),
	})
}

#[cfg(unix)]
pub use self::unix::DlProcLoader;

#[cfg(unix)]
mod unix {
	use libc::c_void;
	use std::ffi::CStr;
	use std::path::{Path, PathBuf};
	use std::ptr::NonNull;

	use super::{library_path, symbol_name, LibPtr, ProcLoader, Visibility};
	use crate::{Error, Result};

	#[cfg(test)]
	thread_local! {
		static CLEARS: std::cell::Cell<usize> = std::cell::Cell::new(0);
	}

	// dlerror() is a thread-local slot holding the last failure. Reading it
	// also resets it.
	fn clear_error() {
		#[cfg(test)]
		CLEARS.with(|c| c.set(c.get() + 1));
		unsafe {
			libc::dlerror();
		}
	}

	fn last_error() -> Option<String> {
		let err = unsafe { libc::dlerror() };
		if err.is_null() {
			None
		} else {
			Some(unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned())
		}
	}

	// The slot is cleared first so a stale failure is never read as this
	// lookup's.
	fn lookup(handle: NonNull<c_void>, name: &CStr) -> std::result::Result<*mut c_void, String> {
		clear_error();
		let addr = unsafe { libc::dlsym(handle.as_ptr(), name.as_ptr()) };
		// the pointer alone can't tell a missing export from a null one
		match last_error() {
			Some(message) => Err(message),
			None => Ok(addr),
		}
	}

	fn log_origin(s: &str, addr: *mut c_void) {
		if !log_enabled!(log::Level::Debug) || addr.is_null() {
			return;
		}
		let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
		if unsafe { libc::dladdr(addr as *const c_void, &mut info) } != 0 && !info.dli_fname.is_null()
		{
			let object = unsafe { CStr::from_ptr(info.dli_fname) }.to_string_lossy();
			debug!("Loaded symbol: {} @ {:?} from {}", s, addr, object);
		} else {
			debug!("Loaded symbol: {} @ {:?}", s, addr);
		}
	}

	/// Module opened through `dlopen` with immediate binding.
	pub struct DlProcLoader {
		path: PathBuf,
		handle: Option<NonNull<c_void>>,
	}

	impl DlProcLoader {
		pub fn open(lib_path: &Path, visibility: Visibility) -> Result<Self> {
			let c_path = library_path(lib_path)?;
			let flags = libc::RTLD_NOW
				| match visibility {
					Visibility::Local => libc::RTLD_LOCAL,
					Visibility::Global => libc::RTLD_GLOBAL,
				};

			clear_error();
			let raw = unsafe { libc::dlopen(c_path.as_ptr(), flags) };
			match NonNull::new(raw) {
				Some(handle) => {
					debug!("dlopen {} ({:?}) -> {:?}", lib_path.display(), visibility, handle);
					Ok(DlProcLoader {
						path: lib_path.to_path_buf(),
						handle: Some(handle),
					})
				}
				None => Err(Error::Load {
					path: lib_path.to_path_buf(),
					message: last_error()
						.unwrap_or_else(|| format!("{}: unknown error", lib_path.display())),
				}),
			}
		}
	}

	impl ProcLoader for DlProcLoader {
		fn path(&self) -> &Path {
			&self.path
		}

		fn get_proc_addr(&self, s: &str) -> Result<LibPtr> {
			let name = symbol_name(s)?;
			let handle = self.handle.ok_or_else(|| Error::Resolve {
				symbol: s.to_string(),
				message: format!("{}: library already closed", self.path.display()),
			})?;

			let addr = lookup(handle, &name).map_err(|message| Error::Resolve {
				symbol: s.to_string(),
				message,
			})?;
			log_origin(s, addr);
			Ok(addr as LibPtr)
		}

		fn close(mut self: Box<Self>) -> Result<()> {
			let handle = match self.handle.take() {
				Some(handle) => handle,
				None => return Ok(()),
			};
			clear_error();
			if unsafe { libc::dlclose(handle.as_ptr()) } != 0 {
				return Err(Error::Close(
					last_error().unwrap_or_else(|| format!("{}: unknown error", self.path.display())),
				));
			}
			debug!("dlclose {}", self.path.display());
			Ok(())
		}
	}

	impl Drop for DlProcLoader {
		fn drop(&mut self) {
			if let Some(handle) = self.handle.take() {
				clear_error();
				if unsafe { libc::dlclose(handle.as_ptr()) } != 0 {
					warn!(
						"dlclose {}: {}",
						self.path.display(),
						last_error()
							.unwrap_or_else(|| format!("{}: unknown error", self.path.display()))
					);
				}
			}
		}
	}

	#[cfg(all(test, target_os = "linux", target_env = "gnu"))]
	mod tests {
		use super::*;
		use std::ffi::CString;

		fn clears() -> usize {
			CLEARS.with(|c| c.get())
		}

		fn fail_lookup() {
			let missing = CString::new("missing").unwrap();
			unsafe {
				libc::dlsym(libc::RTLD_DEFAULT, missing.as_ptr());
			}
		}

		#[test]
		fn clear_error_empties_the_slot() {
			fail_lookup();
			assert!(last_error().is_some());
			assert!(last_error().is_none());

			fail_lookup();
			clear_error();
			assert!(last_error().is_none());
		}

		#[test]
		fn every_lookup_clears_once() {
			let loader = DlProcLoader::open(Path::new("libc.so.6"), Visibility::Local).unwrap();

			fail_lookup();
			let before = clears();
			assert!(loader.get_proc_addr("abs").is_ok());
			assert_eq!(clears() - before, 1);

			let before = clears();
			assert!(loader.get_proc_addr("PrintCS").is_err());
			assert_eq!(clears() - before, 1);
		}

		#[test]
		fn lookup_reports_only_its_own_failure() {
			let handle = NonNull::new(unsafe {
				libc::dlopen(b"libc.so.6\0".as_ptr() as *const libc::c_char, libc::RTLD_NOW)
			})
			.unwrap();
			let abs = CString::new("abs").unwrap();
			let nope = CString::new("PrintCS").unwrap();

			fail_lookup();
			assert!(!lookup(handle, &abs).unwrap().is_null());
			let message = lookup(handle, &nope).err().unwrap();
			assert!(message.contains("PrintCS"), "{}", message);
			assert!(!message.contains("missing"), "{}", message);
			unsafe {
				libc::dlclose(handle.as_ptr());
			}
		}

		#[test]
		fn drop_clears_before_dlclose() {
			let loader = DlProcLoader::open(Path::new("libc.so.6"), Visibility::Local).unwrap();
			let before = clears();
			drop(loader);
			assert_eq!(clears() - before, 1);
		}
	}
}

/// Module opened through `shared_library`, which binds lazily on unix.
pub struct SharedLibraryLoader {
	path: PathBuf,
	lib: DynamicLibrary,
}

impl SharedLibraryLoader {
	pub fn open(lib_path: &Path) -> Result<Self> {
		// shared_library panics on an interior nul
		library_path(lib_path)?;
		let lib = DynamicLibrary::open(Some(lib_path)).map_err(|message| Error::Load {
			path: lib_path.to_path_buf(),
			message,
		})?;
		debug!("opened {} through shared_library", lib_path.display());
		Ok(SharedLibraryLoader {
			path: lib_path.to_path_buf(),
			lib,
		})
	}
}

impl ProcLoader for SharedLibraryLoader {
	fn path(&self) -> &Path {
		&self.path
	}

	fn get_proc_addr(&self, s: &str) -> Result<LibPtr> {
		symbol_name(s)?;
		match unsafe { self.lib.symbol::<c_void>(s) } {
			Ok(v) => {
				debug!("Loaded symbol: {} @ {:?}", s, v);
				Ok(v as LibPtr)
			}
			Err(message) => Err(Error::Resolve {
				symbol: s.to_string(),
				message,
			}),
		}
	}

	fn close(self: Box<Self>) -> Result<()> {
		// DynamicLibrary unloads on drop and swallows the dlclose status
		drop(self);
		Ok(())
	}
}
