//! Version information for fbscan.

/// The short version information for fbscan.
pub(crate) const SHORT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The long version information for fbscan.
pub(crate) const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\n",
    env!("CARGO_PKG_DESCRIPTION"),
    "\n",
    "Store schema version: 2"
);
