//! Package-level constants.

/// Current version of the proxy (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `User-Agent` sent on every upstream request.
pub const USER_AGENT: &str = concat!("mxws/", env!("CARGO_PKG_VERSION"));
