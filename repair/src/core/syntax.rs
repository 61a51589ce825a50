//! Syntax-only pre-flight check for Python sources.
//!
//! Parsing happens in-process with tree-sitter, so a broken candidate is
//! rejected without spawning an interpreter. The grammar is more permissive
//! than CPython in places; anything it accepts still runs through the real
//! interpreter, which reports remaining errors itself.

use std::cell::RefCell;
use std::fmt;

use tree_sitter::{Node, Parser};

thread_local! {
    static PYTHON_PARSER: RefCell<Option<Parser>> = RefCell::new({
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .ok()
            .map(|()| parser)
    });
}

const SNIPPET_CHARS: usize = 40;

/// First syntax error found in a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxIssue {
    /// 1-based line.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
    pub message: String,
}

impl fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SyntaxError: {} (line {}, column {})",
            self.message, self.line, self.column
        )
    }
}

/// Check `source` for syntax errors.
///
/// Returns `Ok(())` when the parser is unavailable; the interpreter remains
/// the authority in that case.
pub fn check_syntax(source: &str) -> Result<(), SyntaxIssue> {
    PYTHON_PARSER.with(|cell| {
        let mut slot = cell.borrow_mut();
        let Some(parser) = slot.as_mut() else {
            return Ok(());
        };
        let Some(tree) = parser.parse(source, None) else {
            return Ok(());
        };
        let root = tree.root_node();
        if !root.has_error() {
            return Ok(());
        }
        Err(match first_error(root) {
            Some(node) => describe(node, source),
            None => SyntaxIssue {
                line: 1,
                column: 1,
                message: "invalid syntax".to_string(),
            },
        })
    })
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = first_error(child) {
            return Some(found);
        }
    }
    None
}

fn describe(node: Node<'_>, source: &str) -> SyntaxIssue {
    let position = node.start_position();
    let message = if node.is_missing() {
        format!("expected `{}`", node.kind())
    } else {
        let snippet = source
            .get(node.byte_range())
            .map(first_line)
            .unwrap_or_default();
        if snippet.is_empty() {
            "invalid syntax".to_string()
        } else {
            format!("invalid syntax near `{snippet}`")
        }
    };
    SyntaxIssue {
        line: position.row + 1,
        column: position.column + 1,
        message,
    }
}

fn first_line(text: &str) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    if line.chars().count() > SNIPPET_CHARS {
        let cut: String = line.chars().take(SNIPPET_CHARS).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}
