//! Default native builtins
//!
//! Handlers are plain functions so callers that temporarily replace one (the
//! bootstrap shims) can restore the original binding by re-registering it.

use super::natives::{NativeCtx, NativeRegistry};
use super::{Value, VmError};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Install every default builtin into a registry
pub fn install_defaults(registry: &mut NativeRegistry) {
    registry.register("print", print);
    registry.register("file_size", file_size);
    registry.register("file_exists", file_exists);
    registry.register("arg", arg);
    registry.register("argc", argc);
}

/// `print(args…)` — write arguments space-separated, newline-terminated
pub fn print(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, VmError> {
    let line = args
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    writeln!(ctx.output, "{}", line).map_err(|e| VmError::Native(e.to_string()))?;
    Ok(Value::Null)
}

/// `file_size(path)` — size of a file in bytes
pub fn file_size(_ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, VmError> {
    let path = expect_str("file_size", args, 0)?;
    let metadata =
        fs::metadata(path).map_err(|e| VmError::Native(format!("file_size({}): {}", path, e)))?;
    Ok(Value::Int(metadata.len() as i64))
}

/// `file_exists(path)` — 1 if the path exists, else 0
pub fn file_exists(_ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, VmError> {
    let path = expect_str("file_exists", args, 0)?;
    Ok(Value::Int(Path::new(path).exists() as i64))
}

/// `arg(n)` — nth process argument, or null
pub fn arg(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, VmError> {
    let n = match args.first() {
        Some(Value::Int(n)) if *n >= 0 => *n as usize,
        _ => return Err(VmError::Native("arg(n) expects a non-negative integer".into())),
    };
    Ok(ctx
        .process_args
        .get(n)
        .map(|s| Value::Str(s.clone()))
        .unwrap_or(Value::Null))
}

/// `argc()` — number of process arguments
pub fn argc(ctx: &mut NativeCtx<'_>, _args: &[Value]) -> Result<Value, VmError> {
    Ok(Value::Int(ctx.process_args.len() as i64))
}

fn expect_str<'a>(name: &str, args: &'a [Value], idx: usize) -> Result<&'a str, VmError> {
    match args.get(idx) {
        Some(Value::Str(s)) => Ok(s),
        _ => Err(VmError::Native(format!(
            "{}: argument {} must be a string",
            name, idx
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    fn call(
        f: fn(&mut NativeCtx<'_>, &[Value]) -> Result<Value, VmError>,
        args: &[Value],
        process_args: &[String],
    ) -> (Result<Value, VmError>, String) {
        let mut out = Vec::new();
        let globals = FxHashMap::default();
        let mut ctx = NativeCtx {
            output: &mut out,
            globals: &globals,
            process_args,
        };
        let result = f(&mut ctx, args);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_print_joins_args() {
        let (result, out) = call(print, &[Value::Str("a".into()), Value::Int(1)], &[]);
        assert!(matches!(result, Ok(Value::Null)));
        assert_eq!(out, "a 1\n");
    }

    #[test]
    fn test_arg_and_argc() {
        let args = vec!["prog".to_string(), "x".to_string()];
        let (result, _) = call(argc, &[], &args);
        assert!(matches!(result, Ok(Value::Int(2))));

        let (result, _) = call(arg, &[Value::Int(1)], &args);
        assert!(matches!(result, Ok(Value::Str(s)) if s == "x"));

        let (result, _) = call(arg, &[Value::Int(9)], &args);
        assert!(matches!(result, Ok(Value::Null)));
    }

    #[test]
    fn test_file_size_and_exists() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"12345").unwrap();
        let path_str = path.to_string_lossy().to_string();

        let (result, _) = call(file_size, &[Value::Str(path_str.clone())], &[]);
        assert!(matches!(result, Ok(Value::Int(5))));

        let (result, _) = call(file_exists, &[Value::Str(path_str)], &[]);
        assert!(matches!(result, Ok(Value::Int(1))));

        let (result, _) = call(file_exists, &[Value::Str("/no/such/file".into())], &[]);
        assert!(matches!(result, Ok(Value::Int(0))));
    }
}
