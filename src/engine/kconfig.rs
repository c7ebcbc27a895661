//! Textual edits applied to the generated `.config` before `oldconfig`.
//!
//! Edits are exact substring replacements. A pattern missing from the input is
//! skipped without failing the build.

use tracing::debug;

/// `(pattern, replacement)` pairs. The surrounding newlines anchor each match to a
/// whole line.
pub const SUBSTITUTIONS: &[(&str, &str)] = &[
    // hardware sha1 only builds on x86
    ("\nCONFIG_SHA1_HWACCEL=y\n", "\nCONFIG_SHA1_HWACCEL=n\n"),
    // tc needs headers that recent kernels no longer ship
    ("\nCONFIG_TC=y\n", "\nCONFIG_TC=n\n"),
];

/// Lets the shell run applets without a filesystem lookup.
pub const APPENDED: &str = "CONFIG_FEATURE_SH_STANDALONE=y\n";

#[derive(Debug, Default, Eq, PartialEq)]
pub struct PatchReport {
    /// Patterns that matched and were replaced.
    pub applied: Vec<&'static str>,
    /// Patterns that did not occur in the input.
    pub skipped: Vec<&'static str>,
    pub appended: bool,
}

/// Applies every substitution at most once, then appends the standalone shell flag
/// unless that exact line is already present.
pub fn patch_config(input: &str) -> (String, PatchReport) {
    let mut text = input.to_string();
    let mut report = PatchReport::default();

    for (pattern, replacement) in SUBSTITUTIONS.iter().copied() {
        if text.contains(pattern) {
            text = text.replacen(pattern, replacement, 1);
            report.applied.push(pattern.trim());
        } else {
            debug!("config pattern {:?} not found, skipping", pattern.trim());
            report.skipped.push(pattern.trim());
        }
    }

    if !has_line(&text, APPENDED.trim_end()) {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(APPENDED);
        report.appended = true;
    }

    (text, report)
}

fn has_line(text: &str, line: &str) -> bool {
    text.lines().any(|x| x == line)
}
