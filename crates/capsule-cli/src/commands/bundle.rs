//! `capsule bundle` — create a self-contained executable.
//!
//! Concatenates `[engine binary][prelude][payload][trailer]` into a single
//! output file. The engine defaults to the running executable; an engine that
//! already carries a trailer is truncated back to its base binary first, so
//! bundling from a bundled binary never stacks trailers.

use crate::output::StyledOutput;
use anyhow::Context;
use capsule_boot::{read_trailer, write_image, TRAILER_LEN};
use capsule_engine::{CompileOptions, ScriptHost};
use std::io::BufWriter;
use std::path::PathBuf;

pub struct BundleArgs {
    pub prelude: String,
    pub output: String,
    pub payload: Option<String>,
    pub engine: Option<String>,
}

pub fn execute(args: BundleArgs, out: &mut StyledOutput) -> anyhow::Result<()> {
    let engine_path = match &args.engine {
        Some(path) => PathBuf::from(path),
        None => std::env::current_exe().context("Cannot locate the running executable")?,
    };
    let engine = read_engine(&engine_path)?;

    let prelude = std::fs::read_to_string(&args.prelude)
        .with_context(|| format!("Failed to read prelude script: {}", args.prelude))?;
    check_prelude(&prelude, &args.prelude)?;

    let payload = match &args.payload {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("Failed to read payload: {}", path))?
        }
        None => Vec::new(),
    };

    let file = std::fs::File::create(&args.output)
        .with_context(|| format!("Failed to create output: {}", args.output))?;
    let mut writer = BufWriter::new(file);
    let trailer = write_image(&mut writer, &engine, prelude.as_bytes(), &payload)?;
    let file = writer
        .into_inner()
        .context("Failed to flush bundled image")?;
    mark_executable(&file)?;

    out.success("Bundled ");
    out.bold(&args.output);
    out.newline();
    out.info(&format!("  engine   {} bytes\n", engine.len()));
    out.info(&format!(
        "  prelude  {} bytes at {}\n",
        trailer.prelude_len, trailer.prelude_offset
    ));
    out.info(&format!(
        "  payload  {} bytes at {}\n",
        trailer.payload_len, trailer.payload_offset
    ));
    out.info(&format!("  trailer  {} bytes\n", TRAILER_LEN));
    out.flush();
    Ok(())
}

/// Read the engine binary, dropping any appended sections and trailer
fn read_engine(path: &PathBuf) -> anyhow::Result<Vec<u8>> {
    let mut bytes =
        std::fs::read(path).with_context(|| format!("Failed to read engine: {}", path.display()))?;
    if let Some(trailer) = read_trailer(path)? {
        let base = trailer.engine_len(bytes.len() as u64) as usize;
        bytes.truncate(base);
    }
    Ok(bytes)
}

/// Compile the prelude once, so syntax errors surface at bundle time rather
/// than at every launch of the shipped executable
fn check_prelude(source: &str, name: &str) -> anyhow::Result<()> {
    let mut host = ScriptHost::new();
    host.compile(
        source,
        CompileOptions {
            filename: Some(name.to_string()),
            ..Default::default()
        },
    )
    .with_context(|| format!("Prelude does not compile: {}", name))?;
    Ok(())
}

#[cfg(unix)]
fn mark_executable(file: &std::fs::File) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = file.metadata()?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    file.set_permissions(perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn mark_executable(_file: &std::fs::File) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use termcolor::ColorChoice;

    fn bundle(args: BundleArgs) -> anyhow::Result<()> {
        let mut out = StyledOutput::new(ColorChoice::Never);
        execute(args, &mut out)
    }

    fn path_str(path: &std::path::Path) -> String {
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_bundle_layout_and_rebundle_truncation() {
        let dir = TempDir::new().unwrap();
        let engine = dir.path().join("engine");
        let prelude = dir.path().join("prelude.cap");
        let payload = dir.path().join("payload.bin");
        std::fs::write(&engine, vec![0x7F; 512]).unwrap();
        std::fs::write(&prelude, "print(payload_len);").unwrap();
        std::fs::write(&payload, vec![0xAB; 64]).unwrap();

        let bundled = dir.path().join("bundled");
        bundle(BundleArgs {
            prelude: path_str(&prelude),
            output: path_str(&bundled),
            payload: Some(path_str(&payload)),
            engine: Some(path_str(&engine)),
        })
        .unwrap();

        let trailer = read_trailer(&bundled).unwrap().unwrap();
        assert_eq!(trailer.prelude_offset, 512);
        assert_eq!(trailer.payload_offset, 512 + trailer.prelude_len);
        assert_eq!(trailer.payload_len, 64);

        // Bundling again with the bundled file as engine drops its appended
        // sections first; the base binary size stays 512.
        let rebundled = dir.path().join("rebundled");
        bundle(BundleArgs {
            prelude: path_str(&prelude),
            output: path_str(&rebundled),
            payload: None,
            engine: Some(path_str(&bundled)),
        })
        .unwrap();

        let trailer = read_trailer(&rebundled).unwrap().unwrap();
        assert_eq!(trailer.prelude_offset, 512);
        assert_eq!(trailer.payload_len, 0);
    }

    #[test]
    fn test_bundle_rejects_broken_prelude() {
        let dir = TempDir::new().unwrap();
        let engine = dir.path().join("engine");
        let prelude = dir.path().join("broken.cap");
        std::fs::write(&engine, b"engine bytes").unwrap();
        std::fs::write(&prelude, "fn oops( {").unwrap();

        let err = bundle(BundleArgs {
            prelude: path_str(&prelude),
            output: path_str(&dir.path().join("out")),
            payload: None,
            engine: Some(path_str(&engine)),
        })
        .unwrap_err();
        assert!(err.to_string().contains("Prelude does not compile"));
    }

    #[cfg(unix)]
    #[test]
    fn test_bundled_output_is_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let engine = dir.path().join("engine");
        let prelude = dir.path().join("prelude.cap");
        std::fs::write(&engine, b"engine bytes").unwrap();
        std::fs::write(&prelude, "return 0;").unwrap();

        let bundled = dir.path().join("bundled");
        bundle(BundleArgs {
            prelude: path_str(&prelude),
            output: path_str(&bundled),
            payload: None,
            engine: Some(path_str(&engine)),
        })
        .unwrap();

        let mode = std::fs::metadata(&bundled).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
