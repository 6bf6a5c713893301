//! Credential redaction for log output.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// Replacement written in place of every `access_token` value.
pub const REDACTED: &str = "<redacted>";

static ACCESS_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(access_token=)[^&]+").expect("access_token pattern is a valid regex")
});

/// Replace every `access_token=...` query value in `input` with [`REDACTED`].
///
/// Returns the input unchanged (borrowed) when it carries no token.
pub fn redact(input: &str) -> Cow<'_, str> {
    ACCESS_TOKEN.replace_all(input, "${1}<redacted>")
}
