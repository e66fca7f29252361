//! Script parsing
//!
//! A script is split into blocks at directive lines (`// %% ...`). Each block
//! becomes one transaction. The directive preceding a block declares how it
//! runs:
//!
//! ```text
//! // %% write, name="load data"
//! def insert:edge = (1, 2)
//! // %% errors, abort
//! ic never_empty() requires count(edge) = 0
//! // %% load="fixtures/expected.rel"
//! ```
//!
//! Flags never carry over from one directive to the next.

use crate::error::{Error, Result};
use crate::layout::{DIRECTIVE_MARKER, LINE_COMMENT, SCRIPT_EXTENSION, script_stem};
use crate::service::{AllowUnexpected, Step};
use std::path::Path;

/// One transactional unit extracted from a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Stem of the originating file
    pub source_name: String,
    /// Source text of the transaction
    pub code: String,
    /// Name given with `name="..."`
    pub explicit_name: Option<String>,
    /// Run as a write transaction
    pub is_write: bool,
    /// Warnings are expected
    pub expect_warnings: bool,
    /// Errors are expected
    pub expect_errors: bool,
    /// The transaction is expected to abort
    pub expect_abort: bool,
}

impl CodeBlock {
    /// Convert into an executable step with the given name
    pub fn to_step(&self, name: impl Into<String>) -> Step {
        let allow_unexpected = if self.expect_errors {
            AllowUnexpected::Errors
        } else if self.expect_warnings {
            AllowUnexpected::Warning
        } else {
            AllowUnexpected::None
        };
        Step {
            name: name.into(),
            query: self.code.clone(),
            readonly: !self.is_write,
            allow_unexpected,
            expect_abort: self.expect_abort,
        }
    }
}

/// Flags declared on a directive line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockFlags {
    pub write: bool,
    pub warnings: bool,
    pub errors: bool,
    pub abort: bool,
}

/// Parsed directive line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directive {
    pub flags: BlockFlags,
    pub name: Option<String>,
    pub load: Option<String>,
}

impl Directive {
    /// Tokenize the text following the directive marker.
    ///
    /// Keywords and `key="value"` attributes are separated by whitespace
    /// and/or commas. Unknown bare words are ignored so directives can carry
    /// a short description.
    pub fn parse(line: &str) -> std::result::Result<Self, String> {
        let body = line
            .strip_prefix(DIRECTIVE_MARKER)
            .ok_or_else(|| format!("expected '{}'", DIRECTIVE_MARKER))?;

        let mut directive = Directive::default();
        let mut chars = body.chars().peekable();

        loop {
            while chars.next_if(|c| c.is_whitespace() || *c == ',').is_some() {}
            if chars.peek().is_none() {
                break;
            }

            let mut word = String::new();
            while let Some(c) = chars.next_if(|c| !c.is_whitespace() && *c != ',' && *c != '=') {
                word.push(c);
            }

            if chars.next_if_eq(&'=').is_none() {
                match word.as_str() {
                    "write" => directive.flags.write = true,
                    "warnings" => directive.flags.warnings = true,
                    "errors" => directive.flags.errors = true,
                    "abort" => directive.flags.abort = true,
                    _ => {}
                }
                continue;
            }

            if chars.next_if_eq(&'"').is_none() {
                return Err(format!("value of '{}' must be double-quoted", word));
            }
            let mut value = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '"' {
                    closed = true;
                    break;
                }
                value.push(c);
            }
            if !closed {
                return Err(format!("unterminated value for '{}'", word));
            }

            match word.as_str() {
                "name" => directive.name = Some(value),
                "load" => directive.load = Some(value),
                other => return Err(format!("unknown attribute '{}'", other)),
            }
        }

        Ok(directive)
    }
}

/// Whether every line of `code` is blank or starts with a line comment.
/// An indented comment is code.
pub fn is_all_comment(code: &str) -> bool {
    code.split('\n')
        .all(|line| line.trim().is_empty() || line.starts_with(LINE_COMMENT))
}

/// Split the lines of a script into blocks.
///
/// `working_dir` resolves `load="..."` paths; `base_name` is the stem of the
/// script and becomes each block's source name.
pub fn parse_blocks<'a, I>(working_dir: &Path, base_name: &str, lines: I) -> Result<Vec<CodeBlock>>
where
    I: IntoIterator<Item = &'a str>,
{
    let owner = working_dir.join(format!("{}.{}", base_name, SCRIPT_EXTENSION));
    let mut blocks = Vec::new();
    let mut active = Directive::default();
    let mut loaded: Option<String> = None;
    let mut buffer = String::new();

    for line in lines {
        if !line.starts_with(DIRECTIVE_MARKER) {
            buffer.push_str(line);
            buffer.push('\n');
            continue;
        }

        flush(&mut blocks, base_name, &active, loaded.take(), &buffer);
        buffer.clear();

        active = Directive::parse(line).map_err(|msg| Error::parse(&owner, line, msg))?;
        if let Some(rel) = &active.load {
            let path = working_dir.join(rel);
            let content = std::fs::read_to_string(&path).map_err(|e| {
                Error::parse(
                    &owner,
                    line,
                    format!("cannot load '{}': {}", path.display(), e),
                )
            })?;
            loaded = Some(content);
        }
    }

    flush(&mut blocks, base_name, &active, loaded, &buffer);
    Ok(blocks)
}

fn flush(
    blocks: &mut Vec<CodeBlock>,
    base_name: &str,
    directive: &Directive,
    loaded: Option<String>,
    buffer: &str,
) {
    let code = loaded.unwrap_or_else(|| buffer.to_string());
    if code.trim().is_empty() || is_all_comment(&code) {
        return;
    }
    blocks.push(CodeBlock {
        source_name: base_name.to_string(),
        code,
        explicit_name: directive.name.clone(),
        is_write: directive.flags.write,
        expect_warnings: directive.flags.warnings,
        expect_errors: directive.flags.errors,
        expect_abort: directive.flags.abort,
    });
}

/// Read and parse a script file
pub fn read_blocks(path: &Path) -> Result<Vec<CodeBlock>> {
    let content = std::fs::read_to_string(path)?;
    let working_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_blocks(working_dir, &script_stem(path), content.lines())
}

/// Execution names for the blocks of one file.
///
/// A lone block is named after its explicit name or the file; multiple
/// blocks get a 1-based index prefix.
pub fn step_names(base_name: &str, blocks: &[CodeBlock]) -> Vec<String> {
    if let [block] = blocks {
        return vec![block.explicit_name.clone().unwrap_or_else(|| base_name.to_string())];
    }
    blocks
        .iter()
        .enumerate()
        .map(|(i, block)| {
            format!(
                "{}-{}",
                i + 1,
                block.explicit_name.as_deref().unwrap_or(base_name)
            )
        })
        .collect()
}

/// Convert the blocks of one file into named steps
pub fn to_steps(base_name: &str, blocks: &[CodeBlock]) -> Vec<Step> {
    step_names(base_name, blocks)
        .into_iter()
        .zip(blocks)
        .map(|(name, block)| block.to_step(name))
        .collect()
}
