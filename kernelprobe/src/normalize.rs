//! Text normalization for captured output.
//!
//! Output from the driven program carries terminal styling and a version
//! banner, both of which change independently of behavior. These helpers
//! remove them so captured text can be compared across runs and releases.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// An escape byte followed by either a single Fe byte or a full CSI
/// sequence (parameters, intermediates, final byte).
pub const CONTROL_SEQUENCE_PATTERN: &str = r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])";

/// `major.minor.patch` with an optional `-tag.N` pre-release suffix.
pub const VERSION_PATTERN: &str = r"[0-9]+\.[0-9]+\.[0-9]+(?:-[a-z]+\.[0-9]+)?";

/// Replacement for every redacted version string.
pub const VERSION_PLACEHOLDER: &str = "VERSION";

const ESC: u8 = 0x1b;

static CONTROL_SEQUENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(CONTROL_SEQUENCE_PATTERN).expect("control sequence pattern is valid")
});

static VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(VERSION_PATTERN).expect("version pattern is valid"));

/// Remove terminal escape sequences from `text`.
///
/// Idempotent: stripping already-stripped text returns it unchanged. Removing
/// one sequence can splice a new one together (`ESC ESC[0m [0m`), so the
/// pattern is applied until nothing matches.
pub fn strip_control_sequences(text: &str) -> Cow<'_, str> {
    if memchr::memchr(ESC, text.as_bytes()).is_none() {
        return Cow::Borrowed(text);
    }
    let mut current = Cow::Borrowed(text);
    loop {
        let next = match CONTROL_SEQUENCE.replace_all(&current, "") {
            Cow::Borrowed(_) => break,
            Cow::Owned(next) => next,
        };
        current = Cow::Owned(next);
    }
    current
}

/// Replace every semantic-version-shaped substring with [`VERSION_PLACEHOLDER`].
pub fn redact_version(text: &str) -> Cow<'_, str> {
    VERSION.replace_all(text, VERSION_PLACEHOLDER)
}

/// Optionally strip control sequences, then redact versions.
pub fn normalize(text: &str, strip: bool) -> String {
    let stripped = if strip {
        strip_control_sequences(text)
    } else {
        Cow::Borrowed(text)
    };
    redact_version(&stripped).into_owned()
}
