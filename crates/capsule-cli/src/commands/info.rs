//! `capsule info` — inspect a bundled image or a compiled cache blob.

use crate::output::StyledOutput;
use anyhow::Context;
use capsule_boot::{read_trailer, TRAILER_LEN};
use capsule_engine::{cache, EngineConfig, Module, SanityCheck, CACHE_MAGIC};
use std::path::Path;

pub fn execute(file: &str, out: &mut StyledOutput) -> anyhow::Result<()> {
    let path = Path::new(file);
    if !path.exists() {
        anyhow::bail!("File not found: {}", file);
    }

    if let Some(trailer) = read_trailer(path)? {
        let total_len = std::fs::metadata(path)?.len();
        out.bold(&format!("{}: bundled executable image\n", file));
        out.plain(&format!(
            "  engine   {} bytes\n",
            trailer.engine_len(total_len)
        ));
        if trailer.has_prelude() {
            out.plain(&format!(
                "  prelude  {} bytes at {}\n",
                trailer.prelude_len, trailer.prelude_offset
            ));
        } else {
            out.plain("  prelude  (none)\n");
        }
        if trailer.payload_offset != 0 {
            out.plain(&format!(
                "  payload  {} bytes at {}\n",
                trailer.payload_len, trailer.payload_offset
            ));
        } else {
            out.plain("  payload  (none)\n");
        }
        out.plain(&format!("  trailer  {} bytes\n", TRAILER_LEN));
        out.flush();
        return Ok(());
    }

    let bytes = std::fs::read(path).with_context(|| format!("Failed to read: {}", file))?;
    if bytes.len() >= CACHE_MAGIC.len() && bytes[..CACHE_MAGIC.len()] == CACHE_MAGIC {
        return describe_blob(file, &bytes, out);
    }

    anyhow::bail!("{} is neither a bundled image nor a compiled blob", file)
}

fn describe_blob(file: &str, blob: &[u8], out: &mut StyledOutput) -> anyhow::Result<()> {
    out.bold(&format!("{}: compiled cache blob\n", file));

    let expected = EngineConfig::cache_flags().flags_hash();
    let check = cache::sanity_check(blob, expected);
    match check {
        SanityCheck::Ok => out.success("  sanity check: ok\n"),
        other => {
            out.stderr_error(&format!("  sanity check: rejected ({:?})\n", other));
            out.flush();
            return Ok(());
        }
    }

    let payload = cache::payload(blob).unwrap_or_default();
    let module = Module::decode(payload)
        .with_context(|| format!("Blob payload does not decode: {}", file))?;
    out.plain(&format!("  module   {}\n", module.metadata.name));
    out.plain(&format!("  payload  {} bytes\n", payload.len()));
    out.plain(&format!("  functions ({}):\n", module.functions.len()));
    for function in &module.functions {
        out.plain(&format!("    {}/{}\n", function.name, function.arity));
    }
    out.flush();
    Ok(())
}
