use crate::definition::{validate_name, ArchitectureDescriptor};
use miette::{Diagnostic, NamedSource, SourceSpan};
use serde::Deserialize;
use thiserror::Error;

/// On-disk shape of an architecture record. Unknown keys are ignored.
#[derive(Debug, Deserialize)]
struct DescriptorRecord {
    #[serde(default)]
    name: Option<String>,
    clang_target: String,
    #[serde(default)]
    arch_option: Option<String>,
    #[serde(default)]
    lld_option: Option<String>,
}

#[derive(Debug, Diagnostic, Error)]
#[error("invalid architecture config {file_name}: {reason}")]
#[diagnostic(
    code(zigbox::config::invalid),
    help("records need a string `clang_target`; `name`, `arch_option` and `lld_option` are optional strings")
)]
pub struct InvalidDescriptor {
    pub file_name: String,
    pub reason: String,

    #[source_code]
    pub source_code: NamedSource,

    /// Position reported by the parser, when it knows one.
    #[label("here")]
    pub span: Option<SourceSpan>,
}

impl InvalidDescriptor {
    fn new(file_name: &str, text: &str, reason: String, span: Option<SourceSpan>) -> Self {
        InvalidDescriptor {
            file_name: file_name.to_string(),
            reason,
            source_code: NamedSource::new(file_name, text.to_string()),
            span,
        }
    }
}

/// Parses one JSON5 record. `stem` is the file stem, used when the record has no `name`.
pub fn parse_descriptor(
    stem: &str,
    file_name: &str,
    text: &str,
) -> Result<ArchitectureDescriptor, InvalidDescriptor> {
    let record: DescriptorRecord = json5::from_str(text).map_err(|e| {
        let json5::Error::Message { msg, location } = e;
        let span = location.map(|loc| span_at(text, loc.line, loc.column));
        InvalidDescriptor::new(file_name, text, msg, span)
    })?;

    let name = record
        .name
        .as_deref()
        .map(str::trim)
        .unwrap_or(stem)
        .to_string();

    validate_name(&name)
        .map_err(|reason| InvalidDescriptor::new(file_name, text, reason.to_string(), None))?;

    let target = record.clang_target.trim();
    if target.is_empty() {
        return Err(InvalidDescriptor::new(
            file_name,
            text,
            "`clang_target` must not be empty".to_string(),
            None,
        ));
    }

    let mut descriptor = ArchitectureDescriptor::new(name, target);
    if let Some(opt) = record.arch_option {
        descriptor = descriptor.with_arch_option(opt);
    }
    if let Some(opt) = record.lld_option {
        descriptor = descriptor.with_lld_option(opt);
    }

    Ok(descriptor)
}

/// Converts a 1-based line/column pair into a one character span.
fn span_at(text: &str, line: usize, column: usize) -> SourceSpan {
    let mut offset = 0;
    for (idx, content) in text.split_inclusive('\n').enumerate() {
        if idx + 1 == line {
            let col = content
                .char_indices()
                .nth(column.saturating_sub(1))
                .map_or(content.len(), |(i, _)| i);
            offset += col;
            break;
        }
        offset += content.len();
    }

    let offset = offset.min(text.len());
    let len = if offset < text.len() { 1 } else { 0 };
    SourceSpan::from((offset, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relaxed_json_is_accepted() {
        let text = r#"
        // 64-bit arm
        {
            clang_target: "aarch64-linux-musl",
            arch_option: null,
        }
        "#;
        let desc = parse_descriptor("arm64", "arm64.json5", text).unwrap();
        assert_eq!(desc.name(), "arm64");
        assert_eq!(desc.target_triple(), "aarch64-linux-musl");
        assert_eq!(desc.arch_option(), None);
        assert_eq!(desc.lld_option(), None);
    }

    #[test]
    fn name_field_overrides_stem() {
        let text = r#"{ name: " x86 ", clang_target: "x86_64-linux-musl", arch_option: "-mno-sse" }"#;
        let desc = parse_descriptor("x86_64", "x86_64.json5", text).unwrap();
        assert_eq!(desc.name(), "x86");
        assert_eq!(desc.arch_option(), Some("-mno-sse"));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let text = r#"{ clang_target: "riscv64-linux-musl", comment: "rv64gc" }"#;
        assert!(parse_descriptor("riscv64", "riscv64.json5", text).is_ok());
    }

    #[test]
    fn missing_target_is_rejected() {
        let err = parse_descriptor("arm64", "arm64.json5", "{ arch_option: \"-O2\" }").unwrap_err();
        assert_eq!(err.file_name, "arm64.json5");
        assert!(err.reason.contains("clang_target"), "{}", err.reason);
    }

    #[test]
    fn mistyped_target_is_rejected() {
        assert!(parse_descriptor("arm64", "arm64.json5", "{ clang_target: 64 }").is_err());
    }

    #[test]
    fn blank_target_is_rejected() {
        let err = parse_descriptor("arm64", "arm64.json5", "{ clang_target: \" \" }").unwrap_err();
        assert!(err.reason.contains("must not be empty"));
    }

    #[test]
    fn reserved_name_is_rejected() {
        let text = r#"{ name: "result", clang_target: "aarch64-linux-musl" }"#;
        assert!(parse_descriptor("arm64", "arm64.json5", text).is_err());
    }

    #[test]
    fn syntax_errors_point_into_the_file() {
        let text = "{\n  clang_target: \"a\"\n  oops\n}";
        let err = parse_descriptor("a", "a.json5", text).unwrap_err();
        let span = err.span.expect("parser reports a location");
        assert!(span.offset() <= text.len());
    }

    #[test]
    fn span_math() {
        let text = "ab\ncd\n";
        assert_eq!(span_at(text, 1, 1).offset(), 0);
        assert_eq!(span_at(text, 2, 2).offset(), 4);
        assert_eq!(span_at(text, 9, 9).offset(), text.len());
    }
}
