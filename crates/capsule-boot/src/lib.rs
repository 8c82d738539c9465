//! Capsule self-contained executable bootstrap
//!
//! Everything that turns a Capsule engine binary plus appended data into a
//! self-starting program:
//! - **Image**: the `[engine][prelude][payload][trailer]` layout and its
//!   binary trailer (`image` module)
//! - **Relay**: the argv relay launcher and its contiguous argument buffer
//!   (`relay` module)
//! - **Loader**: the one-time bootstrap that reads and executes the embedded
//!   prelude (`loader` module)
//! - **Guard**: explicit bootstrap state preventing double execution
//!   (`guard` module)
//!
//! The whole crate is single-threaded and synchronous by design: bootstrap
//! runs to completion on the main thread before user code executes.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Executable image layout and trailer
pub mod image;

/// Argv relay launcher
pub mod relay;

/// Bootstrap loader
pub mod loader;

/// Idempotent bootstrap state
pub mod guard;

pub use guard::BootstrapState;
pub use image::{read_trailer, write_image, ImageError, ImageTrailer, TRAILER_LEN, TRAILER_MAGIC};
pub use loader::{
    install_introspection_shims, restore_introspection_shims, run_bootstrap, strip_relay_tokens,
    BootstrapError, BootstrapOutcome,
};
pub use relay::{
    determine_invocation_kind, is_relay_token, mark_relayed, relay_args, ArgvRelayBuffer,
    InvocationKind, ARGV_MARKER_BLOCK, PLACEHOLDER_TOKEN, RELAY_ENV_VAR,
};
