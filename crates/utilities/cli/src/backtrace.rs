//! Backtrace defaults for the binaries.

use std::{env, sync::Once};

static INIT: Once = Once::new();

/// Turns on backtraces for panics and `anyhow` errors unless `RUST_BACKTRACE` already
/// says otherwise.
///
/// Must run at the top of `main`, before any other thread exists.
pub fn enable() {
    INIT.call_once(|| {
        if env::var_os("RUST_BACKTRACE").is_none() {
            // SAFETY: runs once, before the runtime or any other thread is started.
            unsafe { env::set_var("RUST_BACKTRACE", "1") };
        }
    });
}
