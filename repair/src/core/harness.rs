//! Harness composition for sandboxed execution.
//!
//! [`compose`] turns a candidate fragment and an optional test harness into a
//! single runnable script. When the result has no top-level
//! `if __name__ == "__main__":` block, one is injected between sentinel
//! comment lines so that [`strip_injected`] can later remove it losslessly.
//!
//! Harness lines are re-indented under the injected block, so a harness whose
//! multi-line string literals depend on column zero will see four extra
//! spaces inside those literals.

use std::sync::LazyLock;

use regex::Regex;

/// Entry-point guard emitted by the composer.
pub const ENTRY_POINT_LINE: &str = "if __name__ == \"__main__\":";

const BEGIN_HARNESS_MARKER: &str = "# >>> repair: injected entry point (harness) >>>";
const BEGIN_NOOP_MARKER: &str = "# >>> repair: injected entry point (no-op) >>>";
const END_MARKER: &str = "# <<< repair: injected entry point <<<";
const BODY_INDENT: &str = "    ";
const NOOP_BODY: &str = "    pass";

static ENTRY_POINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^if\s+(?:__name__\s*==\s*['"]__main__['"]|['"]__main__['"]\s*==\s*__name__)\s*:"#,
    )
    .expect("entry point pattern should be valid")
});

/// Kind of entry-point block added by [`compose`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Injection {
    /// The harness body was wrapped in the injected block.
    Harness,
    /// No harness was supplied; the block only contains `pass`.
    NoOp,
}

/// Script produced by [`compose`], with a structured record of any injection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledScript {
    script: String,
    base: String,
    injection: Option<Injection>,
}

impl AssembledScript {
    /// Full script text as written to disk.
    pub fn script(&self) -> &str {
        &self.script
    }

    /// Normalized `code` + `harness` concatenation, before any injection.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn injection(&self) -> Option<Injection> {
        self.injection
    }

    pub fn into_script(self) -> String {
        self.script
    }
}

/// Remove common leading indentation and surrounding blank lines.
///
/// Whitespace-only lines become empty and trailing whitespace at the end of
/// the fragment is dropped. Line endings are normalized to `\n`.
pub fn normalize(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let Some(start) = lines.iter().position(|line| !line.trim().is_empty()) else {
        return String::new();
    };
    let end = lines
        .iter()
        .rposition(|line| !line.trim().is_empty())
        .unwrap_or(start);
    let body = &lines[start..=end];
    let indent = common_indent(body);

    let dedented: Vec<&str> = body
        .iter()
        .copied()
        .map(|line| {
            if line.trim().is_empty() {
                ""
            } else {
                line.strip_prefix(indent).unwrap_or(line)
            }
        })
        .collect();
    dedented.join("\n").trim_end().to_string()
}

fn common_indent<'a>(lines: &[&'a str]) -> &'a str {
    let mut common: Option<&'a str> = None;
    for line in lines.iter().copied().filter(|line| !line.trim().is_empty()) {
        let width = line.len() - line.trim_start_matches([' ', '\t']).len();
        let indent = &line[..width];
        common = Some(match common {
            None => indent,
            Some(prev) => {
                let shared = prev
                    .bytes()
                    .zip(indent.bytes())
                    .take_while(|(left, right)| left == right)
                    .count();
                &prev[..shared]
            }
        });
    }
    common.unwrap_or("")
}

/// Concatenate two fragments separated by one blank line, skipping empty ones.
pub fn join_fragments(first: &str, second: &str) -> String {
    match (first.is_empty(), second.is_empty()) {
        (true, _) => second.to_string(),
        (_, true) => first.to_string(),
        _ => format!("{first}\n\n{second}"),
    }
}

/// Whether `source` has a top-level `if __name__ == "__main__":` guard.
pub fn has_entry_point(source: &str) -> bool {
    ENTRY_POINT.is_match(source)
}

/// Text preceding the first top-level entry-point guard, or the whole input.
pub fn split_entry_point(code: &str) -> &str {
    match ENTRY_POINT.find(code) {
        Some(found) => code[..found.start()].trim_end(),
        None => code.trim_end(),
    }
}

/// Build the executable script for `code` and an optional `harness`.
pub fn compose(code: &str, harness: Option<&str>) -> AssembledScript {
    let code = normalize(code);
    let harness = harness.map(normalize).unwrap_or_default();
    let base = join_fragments(&code, &harness);

    if has_entry_point(&base) {
        return AssembledScript {
            script: base.clone(),
            base,
            injection: None,
        };
    }

    let (injection, block) = if harness.is_empty() {
        (
            Injection::NoOp,
            entry_point_block(BEGIN_NOOP_MARKER, NOOP_BODY),
        )
    } else {
        (
            Injection::Harness,
            entry_point_block(BEGIN_HARNESS_MARKER, &indent_body(&harness)),
        )
    };

    AssembledScript {
        script: join_fragments(&code, &block),
        base,
        injection: Some(injection),
    }
}

fn entry_point_block(begin: &str, body: &str) -> String {
    format!("{begin}\n{ENTRY_POINT_LINE}\n{body}\n{END_MARKER}")
}

fn indent_body(harness: &str) -> String {
    harness
        .split('\n')
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{BODY_INDENT}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Remove injected entry-point blocks, restoring the pre-injection text.
///
/// Scripts without a well-formed injected block are returned unchanged.
/// Stripping repeats until no block remains, so the operation is idempotent.
pub fn strip_injected(script: &str) -> String {
    let mut current = script.to_string();
    while let Some(stripped) = strip_once(&current) {
        current = stripped;
    }
    current
}

struct Line<'a> {
    start: usize,
    text: &'a str,
}

impl Line<'_> {
    fn end(&self) -> usize {
        self.start + self.text.len()
    }
}

fn split_lines(text: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut start = 0;
    for line in text.split('\n') {
        lines.push(Line { start, text: line });
        start += line.len() + 1;
    }
    lines
}

fn strip_once(script: &str) -> Option<String> {
    let lines = split_lines(script);
    for (begin, line) in lines.iter().enumerate() {
        let injection = match line.text {
            BEGIN_HARNESS_MARKER => Injection::Harness,
            BEGIN_NOOP_MARKER => Injection::NoOp,
            _ => continue,
        };
        let Some(guard) = lines.get(begin + 1) else {
            continue;
        };
        if guard.text != ENTRY_POINT_LINE {
            continue;
        }
        let Some(end) = lines
            .iter()
            .skip(begin + 2)
            .position(|line| line.text == END_MARKER)
            .map(|offset| begin + 2 + offset)
        else {
            continue;
        };

        let body = &lines[begin + 2..end];
        let restored = match injection {
            Injection::NoOp => {
                if body.len() != 1 || body[0].text != NOOP_BODY {
                    continue;
                }
                String::new()
            }
            Injection::Harness => match unindent_body(body) {
                Some(text) => text,
                None => continue,
            },
        };

        let prefix = &script[..line.start];
        let prefix = prefix
            .strip_suffix("\n\n")
            .or_else(|| prefix.strip_suffix('\n'))
            .unwrap_or(prefix);
        let rest = &script[lines[end].end()..];
        return Some(format!("{}{}", join_fragments(prefix, &restored), rest));
    }
    None
}

fn unindent_body(body: &[Line<'_>]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    let mut out = Vec::with_capacity(body.len());
    for line in body {
        if line.text.is_empty() {
            out.push("");
        } else {
            out.push(line.text.strip_prefix(BODY_INDENT)?);
        }
    }
    Some(out.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_dedents_and_trims() {
        let input = "\n\n    def f():\n        return 1\n\n    x = f()   \n  \n";
        assert_eq!(normalize(input), "def f():\n    return 1\n\nx = f()");
    }

    #[test]
    fn normalize_keeps_mixed_indent_prefix() {
        let input = "\tif x:\n\t    y = 1";
        assert_eq!(normalize(input), "if x:\n    y = 1");
    }

    #[test]
    fn normalize_blank_input_is_empty() {
        assert_eq!(normalize("  \n\t\n"), "");
    }

    #[test]
    fn compose_wraps_harness_in_injected_entry_point() {
        let assembled = compose("def add(a,b): return a-b", Some("assert add(2,3)==5"));
        assert_eq!(assembled.injection(), Some(Injection::Harness));
        let script = assembled.script();
        assert!(script.starts_with("def add(a,b): return a-b\n\n"));
        assert!(script.contains(ENTRY_POINT_LINE));
        assert!(script.contains("\n    assert add(2,3)==5\n"));
        assert!(has_entry_point(script));
    }

    #[test]
    fn compose_without_harness_injects_noop() {
        let assembled = compose("x = 1", None);
        assert_eq!(assembled.injection(), Some(Injection::NoOp));
        assert!(assembled.script().contains("\n    pass\n"));
        assert_eq!(assembled.base(), "x = 1");
    }

    #[test]
    fn compose_keeps_existing_entry_point() {
        let code = "def f():\n    return 1\n\nif __name__ == '__main__':\n    assert f() == 1";
        let assembled = compose(code, Some("print('extra')"));
        assert_eq!(assembled.injection(), None);
        assert_eq!(assembled.script(), format!("{code}\n\nprint('extra')"));
    }

    #[test]
    fn entry_point_in_harness_counts() {
        let assembled = compose(
            "def f(): return 1",
            Some("if \"__main__\" == __name__:\n    assert f() == 1"),
        );
        assert_eq!(assembled.injection(), None);
    }

    #[test]
    fn indented_guard_is_not_an_entry_point() {
        assert!(!has_entry_point(
            "def main():\n    if __name__ == '__main__':\n        pass"
        ));
    }

    #[test]
    fn strip_restores_concatenation() {
        let cases: [(&str, Option<&str>); 5] = [
            ("def add(a,b): return a-b", Some("assert add(2,3)==5")),
            ("x = 1", None),
            ("", Some("assert True")),
            (
                "    def f(x):\n        return x\n",
                Some("\n  import math\n\n  assert f(1) == 1\n  # done\n"),
            ),
            ("def g():\n\treturn 2", Some("for i in range(2):\n\tassert g() == 2")),
        ];
        for (code, harness) in cases {
            let assembled = compose(code, harness);
            let expected = join_fragments(&normalize(code), &normalize(harness.unwrap_or("")));
            assert_eq!(strip_injected(assembled.script()), expected, "code={code:?}");
            assert_eq!(assembled.base(), expected);
        }
    }

    fn fragment(body: &str, indent: &str, pad: (&str, &str), crlf: bool) -> String {
        let indented: Vec<String> = body
            .split('\n')
            .map(|line| {
                if line.is_empty() {
                    String::new()
                } else {
                    format!("{indent}{line}")
                }
            })
            .collect();
        let text = format!("{}{}{}", pad.0, indented.join("\n"), pad.1);
        if crlf { text.replace('\n', "\r\n") } else { text }
    }

    #[test]
    fn strip_restores_generated_fragments() {
        let codes = [
            "def add(a, b):\n    return a - b",
            "class C:\n\tdef m(self):\n\t\treturn 1\n  \nc = C()",
            "s = '# >>> repair: injected entry point (harness) >>>'\nt = \"if __name__ == '__main__':\"",
            "def main():\n    pass\n\nif __name__ == '__main__':\n    main()",
            "",
        ];
        let harnesses = [
            None,
            Some("assert add(2, 3) == 5"),
            Some("import math\n\nfor i in range(2):\n\tassert i >= 0\n# <<< repair: injected entry point <<<"),
            Some("# >>> repair: injected entry point (no-op) >>>\nx = 1\n    \nassert x"),
            Some(" \n\t\n"),
        ];
        let indents = ["", "  ", "\t", "    "];
        let pads = [("", ""), ("\n\n", "\n"), (" \t\n", "\n  \n")];

        let mut checked = 0;
        for (code_idx, code) in codes.iter().enumerate() {
            for (harness_idx, harness) in harnesses.iter().enumerate() {
                for (indent_idx, indent) in indents.iter().enumerate() {
                    for (pad_idx, pad) in pads.iter().enumerate() {
                        let crlf = (code_idx + harness_idx + indent_idx + pad_idx) % 2 == 1;
                        let code = fragment(code, indent, *pad, crlf);
                        let other_indent = indents[(indent_idx + 1) % indents.len()];
                        let other_pad = pads[(pad_idx + 2) % pads.len()];
                        let harness =
                            harness.map(|body| fragment(body, other_indent, other_pad, false));

                        let assembled = compose(&code, harness.as_deref());
                        let expected = join_fragments(
                            &normalize(&code),
                            &normalize(harness.as_deref().unwrap_or("")),
                        );
                        assert_eq!(assembled.base(), expected, "code={code:?} harness={harness:?}");
                        assert_eq!(
                            strip_injected(assembled.script()),
                            expected,
                            "code={code:?} harness={harness:?}"
                        );
                        assert_eq!(assembled.injection().is_none(), has_entry_point(&expected));
                        assert!(has_entry_point(assembled.script()));
                        checked += 1;
                    }
                }
            }
        }
        assert_eq!(checked, codes.len() * harnesses.len() * indents.len() * pads.len());
    }

    #[test]
    fn strip_is_identity_without_marker() {
        let script = "def f():\n    return 1\n";
        assert_eq!(strip_injected(script), script);
    }

    #[test]
    fn strip_is_idempotent() {
        let nested = format!(
            "{BEGIN_HARNESS_MARKER}\n{ENTRY_POINT_LINE}\n    {BEGIN_NOOP_MARKER}\n    {ENTRY_POINT_LINE}\n        pass\n    {END_MARKER}\n{END_MARKER}\n"
        );
        let composed = compose("a = 1", Some("assert a == 1")).into_script();
        for script in [nested.as_str(), composed.as_str(), "plain", ""] {
            let once = strip_injected(script);
            assert_eq!(strip_injected(&once), once);
        }
        assert_eq!(strip_injected(&nested), "\n");
    }

    #[test]
    fn strip_ignores_malformed_block() {
        let script = format!("x = 1\n\n{BEGIN_HARNESS_MARKER}\n{ENTRY_POINT_LINE}\nassert x\n{END_MARKER}");
        assert_eq!(strip_injected(&script), script);
    }

    #[test]
    fn strip_keeps_text_after_block() {
        let script = format!("{}\n", compose("x = 1", Some("assert x")).script());
        assert_eq!(strip_injected(&script), "x = 1\n\nassert x\n");
    }

    #[test]
    fn split_entry_point_drops_guarded_tail() {
        let code = "def f():\n    return 1\n\nif __name__ == '__main__':\n    assert f() == 1\n";
        assert_eq!(split_entry_point(code), "def f():\n    return 1");
        assert_eq!(split_entry_point("x = 1\n"), "x = 1");
    }
}
