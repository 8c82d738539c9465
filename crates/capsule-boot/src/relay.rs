//! Argv relay launcher
//!
//! Runs before the engine initializes. A direct invocation is rewritten to
//! `[arg0, marker block…, placeholder token, original args 1..N]`; a
//! self-invocation (detected through the relay environment variable) gets the
//! same construction without the placeholder token, after stripping any relay
//! strings already present so a second relay never duplicates them.
//!
//! The marker block is a run of distinct literal strings emitted into a
//! read-only static. An external post-build patcher locates that byte run in
//! the binary and overwrites it with real runtime options, which is why the
//! relayed strings are also copied into one contiguous allocation: the
//! patcher requires a single patchable byte run, not scattered allocations.

use once_cell::sync::Lazy;
use rustc_hash::FxHashSet;
use std::env;

/// Environment variable carrying the "previously relayed by self" sentinel.
///
/// Set to the executable path on first relay; its presence on a later
/// invocation selects the self-invoked branch and prevents infinite relaunch.
pub const RELAY_ENV_VAR: &str = "CAPSULE_EXECPATH";

/// Token inserted as argument 1 on direct invocations.
///
/// Its only job is to suppress downstream "expand argument 1 into an absolute
/// path" logic; the loader strips it before application code runs.
pub const PLACEHOLDER_TOKEN: &str = "CAPSULE_DEFAULT_ENTRYPOINT";

/// Marker block: distinct literal placeholder strings, overwritten post-build
/// by the external patcher with real runtime options.
pub static ARGV_MARKER_BLOCK: [&str; 8] = [
    "CAPSULE_RUNTIME_OPTION_SLOT_00_________________",
    "CAPSULE_RUNTIME_OPTION_SLOT_01_________________",
    "CAPSULE_RUNTIME_OPTION_SLOT_02_________________",
    "CAPSULE_RUNTIME_OPTION_SLOT_03_________________",
    "CAPSULE_RUNTIME_OPTION_SLOT_04_________________",
    "CAPSULE_RUNTIME_OPTION_SLOT_05_________________",
    "CAPSULE_RUNTIME_OPTION_SLOT_06_________________",
    "CAPSULE_RUNTIME_OPTION_SLOT_07_________________",
];

static RELAY_TOKENS: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    let mut set: FxHashSet<&'static str> = ARGV_MARKER_BLOCK.iter().copied().collect();
    set.insert(PLACEHOLDER_TOKEN);
    set
});

/// Whether a string is a relay-inserted marker or the placeholder token
pub fn is_relay_token(s: &str) -> bool {
    RELAY_TOKENS.contains(s)
}

/// How the current process was invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationKind {
    /// First invocation by the user
    Direct,
    /// The process relaunched (or spawned) itself after a previous relay
    SelfInvoked,
}

/// Inspect the relay environment variable to classify this invocation
pub fn determine_invocation_kind() -> InvocationKind {
    if env::var_os(RELAY_ENV_VAR).is_some() {
        InvocationKind::SelfInvoked
    } else {
        InvocationKind::Direct
    }
}

/// Record the relay sentinel for this process and its children
pub fn mark_relayed(exec_path: &str) {
    env::set_var(RELAY_ENV_VAR, exec_path);
}

/// Build the relayed argument list for the given invocation kind.
///
/// Existing relay tokens in `args` are stripped first, so relaying an
/// already-relayed list neither duplicates the marker block nor reinserts the
/// placeholder token.
pub fn relay_args(kind: InvocationKind, args: &[String]) -> ArgvRelayBuffer {
    let mut relayed: Vec<&str> = Vec::with_capacity(args.len() + ARGV_MARKER_BLOCK.len() + 2);
    relayed.push(args.first().map(String::as_str).unwrap_or(""));
    relayed.extend(ARGV_MARKER_BLOCK.iter().copied());
    if kind == InvocationKind::Direct {
        relayed.push(PLACEHOLDER_TOKEN);
    }
    relayed.extend(
        args.iter()
            .skip(1)
            .map(String::as_str)
            .filter(|a| !is_relay_token(a)),
    );
    ArgvRelayBuffer::from_strs(&relayed)
}

/// One contiguous, nul-terminated run of argument strings.
///
/// The post-build patcher rewrites the marker block as a single byte run, so
/// every relayed string lives in this one allocation rather than scattered
/// per-argument buffers.
#[derive(Debug, Clone)]
pub struct ArgvRelayBuffer {
    bytes: Box<[u8]>,
    offsets: Vec<usize>,
}

impl ArgvRelayBuffer {
    /// Copy the given strings into a single contiguous buffer
    pub fn from_strs(args: &[&str]) -> Self {
        let total: usize = args.iter().map(|a| a.len() + 1).sum();
        let mut bytes = Vec::with_capacity(total);
        let mut offsets = Vec::with_capacity(args.len());
        for arg in args {
            offsets.push(bytes.len());
            bytes.extend_from_slice(arg.as_bytes());
            bytes.push(0);
        }
        Self {
            bytes: bytes.into_boxed_slice(),
            offsets,
        }
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether the buffer holds no arguments
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Argument at index `i`
    pub fn get(&self, i: usize) -> Option<&str> {
        let start = *self.offsets.get(i)?;
        let end = self.bytes[start..].iter().position(|&b| b == 0)? + start;
        std::str::from_utf8(&self.bytes[start..end]).ok()
    }

    /// Iterate over the arguments
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    /// Owned argument vector, for handing to the engine entry point
    pub fn to_args(&self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }

    /// The raw contiguous byte run
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_direct_relay_inserts_markers_and_placeholder() {
        let args = strings(&["/bin/app", "input.cap", "--verbose"]);
        let relayed = relay_args(InvocationKind::Direct, &args).to_args();

        assert_eq!(relayed[0], "/bin/app");
        assert_eq!(&relayed[1..=ARGV_MARKER_BLOCK.len()], &ARGV_MARKER_BLOCK[..]);
        assert_eq!(relayed[ARGV_MARKER_BLOCK.len() + 1], PLACEHOLDER_TOKEN);
        assert_eq!(
            &relayed[ARGV_MARKER_BLOCK.len() + 2..],
            &["input.cap".to_string(), "--verbose".to_string()][..]
        );
    }

    #[test]
    fn test_self_invoked_relay_omits_placeholder() {
        let args = strings(&["/bin/app", "x"]);
        let relayed = relay_args(InvocationKind::SelfInvoked, &args).to_args();

        assert!(!relayed.contains(&PLACEHOLDER_TOKEN.to_string()));
        assert_eq!(relayed.last().unwrap(), "x");
    }

    #[test]
    fn test_double_relay_does_not_duplicate() {
        let args = strings(&["/bin/app", "payload-arg"]);
        let first = relay_args(InvocationKind::Direct, &args).to_args();
        let second = relay_args(InvocationKind::SelfInvoked, &first).to_args();

        let marker_count = second.iter().filter(|a| is_relay_token(a)).count();
        assert_eq!(marker_count, ARGV_MARKER_BLOCK.len());
        assert!(!second.contains(&PLACEHOLDER_TOKEN.to_string()));
        assert_eq!(second.last().unwrap(), "payload-arg");
    }

    #[test]
    fn test_buffer_is_one_contiguous_nul_terminated_run() {
        let buffer = ArgvRelayBuffer::from_strs(&["a", "bc", ""]);
        assert_eq!(buffer.as_bytes(), b"a\0bc\0\0");
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.get(0), Some("a"));
        assert_eq!(buffer.get(1), Some("bc"));
        assert_eq!(buffer.get(2), Some(""));
        assert_eq!(buffer.get(3), None);
    }

    #[test]
    fn test_marker_strings_are_distinct() {
        let unique: FxHashSet<&str> = ARGV_MARKER_BLOCK.iter().copied().collect();
        assert_eq!(unique.len(), ARGV_MARKER_BLOCK.len());
    }
}
