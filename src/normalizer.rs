use std::fmt::Write;

use tree_sitter::{Parser, Tree};

/// A source file reduced to the form the similarity scorer compares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// Canonical dump of the syntax tree.
    Tree(String),
    /// Lines with all whitespace removed. Blank lines are kept as `""`.
    Lines(Vec<String>),
    /// The structural strategy could not parse the source.
    Unparseable,
}

impl Normalized {
    pub fn is_unparseable(&self) -> bool {
        matches!(self, Normalized::Unparseable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Strategy {
    /// Compare syntax trees, ignoring formatting and comments
    #[default]
    Tree,
    /// Compare lines with whitespace stripped
    Lines,
}

/// Turns source text into a [`Normalized`] value. Never fails; a source that
/// can't be parsed maps to [`Normalized::Unparseable`].
pub trait Normalize {
    fn normalize(&self, text: &str) -> Normalized;
}

impl Normalize for Strategy {
    fn normalize(&self, text: &str) -> Normalized {
        match self {
            Strategy::Tree => normalize_tree(text),
            Strategy::Lines => normalize_lines(text),
        }
    }
}

// Delimiters whose text would make `'a'` and `"a"` compare differently.
const TEXTLESS_LEAVES: &[&str] = &["string_start", "string_end"];

// Python 2 forms the grammar still accepts.
const PY2_STATEMENTS: &[&str] = &["print_statement", "exec_statement"];
const PY2_OPERATORS: &[&str] = &["<>"];

/// Deepest bracket nesting CPython's tokenizer accepts.
pub const MAX_BRACKET_DEPTH: usize = 200;

pub fn normalize_tree(text: &str) -> Normalized {
    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(&tree_sitter_python::LANGUAGE.into()) {
        tracing::error!("python grammar is unusable: {e}");
        return Normalized::Unparseable;
    }

    let Some(tree) = parser.parse(text, None) else {
        return Normalized::Unparseable;
    };
    if tree.root_node().has_error() {
        return Normalized::Unparseable;
    }

    match dump(&tree, text.as_bytes()) {
        Some(out) => Normalized::Tree(out),
        None => Normalized::Unparseable,
    }
}

/// Writes every node as `kind(child,...)`. Leaves carry their text,
/// anonymous tokens only appear when they fill a grammar field (operators),
/// comments are dropped. Positions are never written.
///
/// The walk is iterative so nesting depth never touches the call stack.
/// Returns `None` for sources a Python 3 parser rejects even though the
/// grammar accepts them.
fn dump(tree: &Tree, source: &[u8]) -> Option<String> {
    let mut out = String::with_capacity(source.len() * 2);
    let mut cursor = tree.walk();
    // One entry per node whose `(` is written; true once it has a child.
    let mut open: Vec<bool> = Vec::new();
    let mut brackets = 0usize;

    loop {
        let node = cursor.node();
        let kind = node.kind();

        if node.is_named() {
            if PY2_STATEMENTS.contains(&kind) {
                return None;
            }
        } else {
            match kind {
                "(" | "[" | "{" => {
                    brackets += 1;
                    if brackets > MAX_BRACKET_DEPTH {
                        return None;
                    }
                }
                ")" | "]" | "}" => brackets = brackets.saturating_sub(1),
                _ if PY2_OPERATORS.contains(&kind) => return None,
                _ => {}
            }
        }

        let is_root = open.is_empty();
        let keep = if is_root {
            true
        } else if node.is_named() {
            kind != "comment"
        } else {
            cursor.field_name().is_some()
        };

        if keep {
            if let Some(written) = open.last_mut() {
                if *written {
                    out.push(',');
                }
                *written = true;
            }

            if !node.is_named() {
                out.push_str(kind);
            } else if node.child_count() == 0 && !is_root {
                if TEXTLESS_LEAVES.contains(&kind) {
                    out.push_str(kind);
                } else {
                    let text = node.utf8_text(source).unwrap_or("");
                    let _ = write!(out, "{kind}:{text:?}");
                }
            } else {
                out.push_str(kind);
                out.push('(');
                if cursor.goto_first_child() {
                    open.push(false);
                    continue;
                }
                out.push(')');
            }
        }

        // Move on to the next sibling, closing every node we climb out of.
        while !cursor.goto_next_sibling() {
            if !cursor.goto_parent() {
                return Some(out);
            }
            open.pop();
            out.push(')');
        }
    }
}

pub fn normalize_lines(text: &str) -> Normalized {
    Normalized::Lines(
        text.lines()
            .map(|line| line.chars().filter(|c| !c.is_whitespace()).collect())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(text: &str) -> String {
        match normalize_tree(text) {
            Normalized::Tree(s) => s,
            other => panic!("expected a tree for {text:?}, got {other:?}"),
        }
    }

    #[test]
    fn tree_keeps_kinds_literals_and_operators() {
        let dump = tree("print(1+1)\n");
        assert!(dump.starts_with("module("));
        assert!(dump.contains("identifier:\"print\""));
        assert!(dump.contains("integer:\"1\""));
        assert!(dump.contains(",+,"));
        assert!(!dump.contains("\"(\""));
    }

    #[test]
    fn tree_ignores_formatting_and_comments() {
        let a = tree("x = 1\nif x == 1:\n    print(x)\n");
        let b = tree("# leading comment\n\n\nx=1\nif x==1:  # trailing\n        print( x )\n");
        assert_eq!(a, b);
    }

    #[test]
    fn tree_ignores_quote_style() {
        assert_eq!(tree("print('hi')"), tree("print(\"hi\")"));
    }

    #[test]
    fn tree_sees_literal_and_operator_changes() {
        assert_ne!(tree("print(1+1)"), tree("print(1+2)"));
        assert_ne!(tree("print(1+1)"), tree("print(1-1)"));
        assert_ne!(tree("a = 'x'"), tree("a = 'y'"));
    }

    #[test]
    fn syntax_errors_are_unparseable() {
        assert_eq!(normalize_tree("print((1+1)"), Normalized::Unparseable);
        assert_eq!(normalize_tree("def f(:\n  pass"), Normalized::Unparseable);
        assert!(Strategy::Tree.normalize("if True\n    x = 1").is_unparseable());
    }

    #[test]
    fn python2_forms_are_unparseable() {
        assert!(normalize_tree("print \"hello\"\n").is_unparseable());
        assert!(normalize_tree("exec \"x=1\"\n").is_unparseable());
        assert!(normalize_tree("if 1 <> 2:\n    pass\n").is_unparseable());
        assert!(!normalize_tree("print(\"hello\")\n").is_unparseable());
    }

    fn nested(depth: usize) -> String {
        format!("x = {}1{}\n", "(".repeat(depth), ")".repeat(depth))
    }

    #[test]
    fn bracket_nesting_stops_at_the_python_limit() {
        assert!(!normalize_tree(&nested(50)).is_unparseable());
        assert!(!normalize_tree(&nested(MAX_BRACKET_DEPTH)).is_unparseable());
        assert!(normalize_tree(&nested(MAX_BRACKET_DEPTH + 1)).is_unparseable());
        assert!(normalize_tree(&nested(5000)).is_unparseable());
        let mixed = format!("x = {}1{}\n", "[(".repeat(101), ")]".repeat(101));
        assert!(normalize_tree(&mixed).is_unparseable());
    }

    #[test]
    fn very_deep_nesting_does_not_overflow() {
        assert!(normalize_tree(&nested(100_000)).is_unparseable());
    }

    #[test]
    fn deep_trees_without_brackets_are_walked() {
        let chain = format!("x = {}1\n", "1 + ".repeat(20_000));
        let dump = tree(&chain);
        assert_eq!(dump.matches("binary_operator(").count(), 20_000);
        assert!(dump.ends_with(")"));
    }

    #[test]
    fn empty_source_is_an_empty_module() {
        assert_eq!(normalize_tree(""), Normalized::Tree("module()".into()));
    }

    #[test]
    fn lines_strip_all_whitespace_and_keep_blank_lines() {
        let n = normalize_lines("def f(a, b):\n\n    return a  +  b\t\n");
        assert_eq!(
            n,
            Normalized::Lines(vec!["deff(a,b):".into(), "".into(), "returna+b".into()])
        );
    }

    #[test]
    fn lines_never_fail() {
        assert!(!Strategy::Lines.normalize("print((((").is_unparseable());
    }
}
