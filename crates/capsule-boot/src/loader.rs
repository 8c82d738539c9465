//! Bootstrap loader
//!
//! Runs once, early in startup, before any application code. Reads the image
//! trailer from the running executable; with no embedded prelude it restores
//! the shimmed file-introspection natives and strips relay tokens from the
//! argument list, otherwise it reads the prelude bytes from the executable's
//! own image and executes them as an ordinary sourced compile. The prelude
//! (external content) receives the open file descriptor and the payload
//! coordinates, and is responsible for extracting the payload and resuming
//! startup.
//!
//! All reads are blocking: bootstrap must fully complete before anything
//! else runs. A short read is always fatal.

use crate::guard::BootstrapState;
use crate::image::{self, ImageTrailer};
use crate::relay::is_relay_token;
use capsule_engine::vm::defaults;
use capsule_engine::{CompileOptions, HostError, NativeRegistry, ScriptHost, Value, VmError};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Bootstrap errors; every one of these aborts startup
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Could not open or read the executable image
    #[error("Bootstrap I/O error: {0}")]
    Io(#[from] io::Error),

    /// The executable image trailer could not be read
    #[error(transparent)]
    Image(#[from] image::ImageError),

    /// The image yielded fewer bytes than the trailer promised
    #[error("Short read: wanted {wanted} bytes, got {got}\n{diagnostic}")]
    ShortRead {
        /// Bytes the trailer declared
        wanted: u64,
        /// Bytes actually read
        got: u64,
        /// Environment dump for the fatal diagnostic
        diagnostic: String,
    },

    /// Embedded prelude bytes were not valid UTF-8
    #[error("Prelude is not valid UTF-8")]
    PreludeEncoding,

    /// Prelude failed to compile
    #[error(transparent)]
    Host(#[from] HostError),

    /// Prelude failed at runtime
    #[error(transparent)]
    Execute(#[from] VmError),
}

/// Result of running the bootstrap
#[derive(Debug)]
pub enum BootstrapOutcome {
    /// The one-time routine already ran in this process
    AlreadyStarted,
    /// No embedded prelude: shims restored, relay tokens stripped
    NoPrelude {
        /// Natural argument list for application code
        args: Vec<String>,
    },
    /// The embedded prelude was executed
    PreludeRan {
        /// Value returned by the prelude's top-level body
        result: Value,
    },
}

/// Remove relay markers and the placeholder token from an argument list
pub fn strip_relay_tokens(args: &[String]) -> Vec<String> {
    args.iter()
        .filter(|a| !is_relay_token(a))
        .cloned()
        .collect()
}

/// Shim the file-introspection natives for a bundled executable.
///
/// While bundled, `file_size` on the running image reports the engine binary
/// length without the appended prelude/payload/trailer; `file_exists` is
/// wrapped unchanged. Both are restored by the loader when no prelude is
/// embedded.
pub fn install_introspection_shims(
    natives: &mut NativeRegistry,
    exe_path: PathBuf,
    visible_len: u64,
) {
    let canonical_exe = std::fs::canonicalize(&exe_path).unwrap_or(exe_path);
    natives.register("file_size", move |ctx, args| {
        if let Some(Value::Str(path)) = args.first() {
            let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| PathBuf::from(path));
            if canonical == canonical_exe {
                return Ok(Value::Int(visible_len as i64));
            }
        }
        defaults::file_size(ctx, args)
    });
    natives.register("file_exists", defaults::file_exists);
}

/// Restore the original file-introspection bindings
pub fn restore_introspection_shims(natives: &mut NativeRegistry) {
    natives.register("file_size", defaults::file_size);
    natives.register("file_exists", defaults::file_exists);
}

/// Run the one-time bootstrap routine.
///
/// `args` is the relayed argument list; `output` is the prelude's console.
pub fn run_bootstrap(
    host: &mut ScriptHost,
    state: &mut BootstrapState,
    exe_path: &Path,
    args: &[String],
    output: &mut dyn Write,
) -> Result<BootstrapOutcome, BootstrapError> {
    if !state.begin() {
        return Ok(BootstrapOutcome::AlreadyStarted);
    }

    let trailer = image::read_trailer(exe_path)?;
    let trailer = match trailer {
        Some(t) if t.has_prelude() => t,
        // Zero prelude offset (or no trailer at all): nothing is embedded.
        // Hand application code its natural argument list.
        _ => {
            restore_introspection_shims(&mut host.natives);
            return Ok(BootstrapOutcome::NoPrelude {
                args: strip_relay_tokens(args),
            });
        }
    };

    let (prelude_text, file) = read_prelude(exe_path, &trailer)?;

    host.set_process_args(strip_relay_tokens(args));
    let mut outcome = host.compile(
        &prelude_text,
        CompileOptions {
            filename: Some("<prelude>".to_string()),
            ..Default::default()
        },
    )?;

    let globals = prelude_globals(&file, &trailer);
    let result = host.execute_with_globals(&mut outcome.unit, globals, output)?;
    // `file` stays open until the prelude returns; the descriptor handed to
    // the prelude must remain valid for the payload read.
    drop(file);

    Ok(BootstrapOutcome::PreludeRan { result })
}

/// Open the running executable and read exactly the prelude bytes
fn read_prelude(exe_path: &Path, trailer: &ImageTrailer) -> Result<(String, File), BootstrapError> {
    let mut file = File::open(exe_path)?;
    file.seek(SeekFrom::Start(trailer.prelude_offset))?;

    let mut bytes = Vec::with_capacity(trailer.prelude_len as usize);
    let got = (&mut file)
        .take(trailer.prelude_len)
        .read_to_end(&mut bytes)? as u64;
    if got < trailer.prelude_len {
        return Err(BootstrapError::ShortRead {
            wanted: trailer.prelude_len,
            got,
            diagnostic: environment_diagnostic(exe_path, trailer),
        });
    }

    let text = String::from_utf8(bytes).map_err(|_| BootstrapError::PreludeEncoding)?;
    Ok((text, file))
}

/// The values handed to the prelude, surfaced as VM globals
fn prelude_globals(file: &File, trailer: &ImageTrailer) -> Vec<(String, Value)> {
    vec![
        ("process_pid".to_string(), Value::Int(std::process::id() as i64)),
        ("payload_fd".to_string(), Value::Int(raw_fd(file))),
        (
            "payload_offset".to_string(),
            Value::Int(trailer.payload_offset as i64),
        ),
        (
            "payload_len".to_string(),
            Value::Int(trailer.payload_len as i64),
        ),
    ]
}

#[cfg(unix)]
fn raw_fd(file: &File) -> i64 {
    use std::os::unix::io::AsRawFd;
    file.as_raw_fd() as i64
}

#[cfg(not(unix))]
fn raw_fd(_file: &File) -> i64 {
    -1
}

/// Diagnostic dump emitted with fatal short reads
fn environment_diagnostic(exe_path: &Path, trailer: &ImageTrailer) -> String {
    let mut vars: Vec<(String, String)> = std::env::vars().collect();
    vars.sort();

    let mut out = String::new();
    out.push_str(&format!("executable: {}\n", exe_path.display()));
    out.push_str(&format!(
        "trailer: prelude {}+{}, payload {}+{}\n",
        trailer.prelude_offset, trailer.prelude_len, trailer.payload_offset, trailer.payload_len
    ));
    out.push_str("environment:\n");
    for (key, value) in vars {
        out.push_str(&format!("  {}={}\n", key, value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{ARGV_MARKER_BLOCK, PLACEHOLDER_TOKEN};

    #[test]
    fn test_strip_relay_tokens() {
        let args = vec![
            "/bin/app".to_string(),
            ARGV_MARKER_BLOCK[0].to_string(),
            PLACEHOLDER_TOKEN.to_string(),
            "user-arg".to_string(),
        ];
        assert_eq!(
            strip_relay_tokens(&args),
            vec!["/bin/app".to_string(), "user-arg".to_string()]
        );
    }

    #[test]
    fn test_guard_short_circuits() {
        let mut host = ScriptHost::new();
        let mut state = BootstrapState::Started;
        let mut out = Vec::new();
        let outcome = run_bootstrap(
            &mut host,
            &mut state,
            Path::new("/nonexistent"),
            &[],
            &mut out,
        )
        .unwrap();
        assert!(matches!(outcome, BootstrapOutcome::AlreadyStarted));
    }
}
