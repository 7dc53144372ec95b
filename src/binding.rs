//! Typed views of resolved exports.

use libc::c_int;
use std::marker::PhantomData;
use std::mem;

use super::dl::{LibPtr, ProcLoader};
use super::{Error, Result};

/// `int f(int)` with the C calling convention.
pub type IntFn = extern "C" fn(c_int) -> c_int;

/// A function pointer type an export can be bound as.
///
/// # Safety
/// `from_ptr` must only reinterpret the address, and `Self` must be a
/// function pointer type.
pub unsafe trait Signature: Copy {
	const DESCRIPTION: &'static str;

	/// # Safety
	/// `ptr` must be non-null and point to code with exactly this signature.
	unsafe fn from_ptr(ptr: LibPtr) -> Self;
}

unsafe impl Signature for IntFn {
	const DESCRIPTION: &'static str = "int(int)";

	unsafe fn from_ptr(ptr: LibPtr) -> Self {
		mem::transmute::<LibPtr, IntFn>(ptr)
	}
}

/// A resolved entry point. It borrows the loader it came from, so it cannot
/// be called once the module is released.
pub struct Entry<'lib, F: Signature> {
	name: String,
	f: F,
	_lib: PhantomData<&'lib ()>,
}

impl<'lib, F: Signature> Entry<'lib, F> {
	pub fn name(&self) -> &str {
		&self.name
	}
}

impl<'lib> Entry<'lib, IntFn> {
	pub fn call(&self, arg: c_int) -> c_int {
		(self.f)(arg)
	}
}

/// Resolves `name` in `loader` and binds it as `F`.
///
/// A null address is refused even when the loader reported no error, since
/// there is nothing to call.
///
/// # Safety
/// The export named `name` must really have the signature `F`. Object files
/// carry no type information to check this against.
pub unsafe fn bind<'lib, L, F>(loader: &'lib L, name: &str) -> Result<Entry<'lib, F>>
where
	L: ProcLoader + ?Sized,
	F: Signature,
{
	let ptr = loader.get_proc_addr(name)?;
	if ptr.is_null() {
		return Err(Error::Resolve {
			symbol: name.to_string(),
			message: format!(
				"{}: symbol `{}` resolved to a null address",
				loader.path().display(),
				name
			),
		});
	}
	debug!("bound `{}` as {}", name, F::DESCRIPTION);
	Ok(Entry {
		name: name.to_string(),
		f: F::from_ptr(ptr),
		_lib: PhantomData,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::path::Path;
	use std::ptr;

	// an export whose address is null while the error channel stays clean
	struct NullExport;

	impl ProcLoader for NullExport {
		fn path(&self) -> &Path {
			Path::new("null-export.so")
		}

		fn get_proc_addr(&self, _s: &str) -> Result<LibPtr> {
			Ok(ptr::null())
		}

		fn close(self: Box<Self>) -> Result<()> {
			Ok(())
		}
	}

	#[test]
	fn null_address_is_a_resolve_error() {
		let err = unsafe { bind::<_, IntFn>(&NullExport, "PrintCS") }
			.err()
			.unwrap();
		match err {
			Error::Resolve { ref symbol, ref message } => {
				assert_eq!(symbol, "PrintCS");
				assert!(message.contains("null address"), "{}", message);
			}
			ref other => panic!("unexpected error: {:?}", other),
		}
		assert!(err.to_string().starts_with("dlsym failed:"));
	}
}

#[cfg(all(test, target_os = "linux", target_env = "gnu"))]
mod libc_tests {
	use super::*;
	use crate::dl::{DlProcLoader, SharedLibraryLoader, Visibility};
	use std::path::Path;

	#[test]
	fn abs_binds_as_int_fn() {
		let loader = DlProcLoader::open(Path::new("libc.so.6"), Visibility::Local).unwrap();
		let abs: Entry<IntFn> = unsafe { bind(&loader, "abs") }.unwrap();
		assert_eq!(abs.name(), "abs");
		assert_eq!(abs.call(123), 123);
		assert_eq!(abs.call(-76), 76);
	}

	#[test]
	fn binds_through_trait_object() {
		let loader: Box<dyn ProcLoader> =
			Box::new(SharedLibraryLoader::open(Path::new("libc.so.6")).unwrap());
		let abs: Entry<IntFn> = unsafe { bind(&*loader, "abs") }.unwrap();
		assert_eq!(abs.call(-5), 5);
	}

	#[test]
	fn missing_export_does_not_bind() {
		let loader = DlProcLoader::open(Path::new("libc.so.6"), Visibility::Local).unwrap();
		let err = unsafe { bind::<_, IntFn>(&loader, "PrintCS") }.err().unwrap();
		assert!(err.to_string().contains("PrintCS"), "{}", err);
	}
}
