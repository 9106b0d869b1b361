//! Shared plumbing for bindings to native libraries.
use std::{
    io::Read,
    path::{Path, PathBuf},
    ptr::NonNull,
};

use libloading::Library;
use tracing::debug;

use crate::{Error, Result};

/// Load `file_name` from `dir` if given, falling back to the system search path.
pub(crate) fn open_library(file_name: &str, dir: Option<&Path>, hint: &str) -> Result<Library> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = dir {
        candidates.push(dir.join(file_name));
    }
    candidates.push(PathBuf::from(file_name));

    let mut reason = String::new();
    for candidate in candidates {
        // SAFETY: the engine libraries run no initialisation code with
        // preconditions on load.
        match unsafe { Library::new(&candidate) } {
            Ok(library) => {
                debug!(library = %candidate.display(), "loaded native library");
                return Ok(library);
            }
            Err(err) => reason = err.to_string(),
        }
    }

    Err(Error::EngineUnavailable {
        library: file_name.to_owned(),
        reason,
        hint: hint.to_owned(),
    })
}

/// Resolve `name` to a plain function pointer of type `T`.
///
/// # Safety
///
/// `T` must be the exact C signature of `name`, and the pointer must not be
/// called after `library` is dropped.
pub(crate) unsafe fn symbol<T: Copy>(
    library: &Library,
    file_name: &str,
    name: &str,
    hint: &str,
) -> Result<T> {
    library
        .get::<T>(name.as_bytes())
        .map(|symbol| *symbol)
        .map_err(|err| Error::EngineUnavailable {
            library: file_name.to_owned(),
            reason: format!("missing symbol {name}: {err}"),
            hint: hint.to_owned(),
        })
}

/// Anonymous temporary `FILE*` that native dump routines write into.
pub(crate) struct CaptureFile(NonNull<libc::FILE>);

impl CaptureFile {
    pub(crate) fn new(engine: &'static str) -> Result<CaptureFile> {
        // SAFETY: tmpfile has no preconditions.
        let file = unsafe { libc::tmpfile() };
        NonNull::new(file).map(CaptureFile).ok_or_else(|| Error::Engine {
            engine,
            message: format!(
                "could not create a temporary file: {}",
                std::io::Error::last_os_error()
            ),
        })
    }

    pub(crate) fn as_ptr(&self) -> *mut libc::FILE {
        self.0.as_ptr()
    }

    /// Everything written so far.
    pub(crate) fn contents(&self, engine: &'static str) -> Result<String> {
        let file = self.as_ptr();
        let mut text = Vec::new();
        let mut buffer = [0_u8; 8192];

        // SAFETY: `file` is a live stream owned by `self`.
        unsafe {
            libc::fflush(file);
            libc::rewind(file);
            loop {
                let read = libc::fread(buffer.as_mut_ptr().cast(), 1, buffer.len(), file);
                if read == 0 {
                    break;
                }
                text.extend_from_slice(&buffer[..read]);
            }
            if libc::ferror(file) != 0 {
                return Err(Error::Engine {
                    engine,
                    message: "could not read back the native dump".to_owned(),
                });
            }
        }

        let mut decoded = String::new();
        text.as_slice()
            .read_to_string(&mut decoded)
            .map_err(|err| Error::Engine {
                engine,
                message: format!("native dump is not text: {err}"),
            })?;
        Ok(decoded)
    }
}

impl Drop for CaptureFile {
    fn drop(&mut self) {
        // SAFETY: the stream was opened by tmpfile and is closed exactly once.
        unsafe {
            libc::fclose(self.as_ptr());
        }
    }
}
