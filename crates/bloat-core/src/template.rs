//! Source parameterizer: turns a seed C file into a mutation target.
//!
//! This is deliberately *not* a C parser. Declarations are recognized with
//! line-oriented patterns, trading soundness for speed and coverage of the
//! language subset seed corpora actually use. Each recognized declarator is
//! replaced by a positional `[INPUT_i]` placeholder and recorded as an
//! [`Input`]; materialization later substitutes concrete values back in.

use bloat_common::ctype::CType;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Whether a declaration was found at file scope or inside a function body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// File-scope declaration (column 0).
    Global,
    /// Function-local declaration (indented line).
    Local,
}

impl Scope {
    /// Ordering rank: a later declaration may inherit a type from an earlier
    /// one only when its scope rank is greater than or equal to the
    /// earlier one's (a local re-assignment can refer to a global).
    fn rank(self) -> u8 {
        match self {
            Scope::Global => 0,
            Scope::Local => 1,
        }
    }
}

/// One mutable declaration site.
///
/// `value` is the *current* literal text; the pristine original stays in the
/// owning [`Template`]'s input list. Candidates clone inputs rather than
/// mutating them in place so prior states stay available for backtracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    /// Identifier of the declared variable.
    pub name: String,
    /// Current literal text ("0" when the declaration had no initializer).
    pub value: String,
    /// Where the declaration appeared.
    pub scope: Scope,
    /// Whether a type keyword introduced it (vs. a bare re-assignment).
    pub is_declared: bool,
    /// Declared type, if one was captured or back-propagated.
    pub ty: Option<CType>,
    /// Element count for arrays / byte count for strings (including the
    /// terminating NUL), `None` for scalars.
    pub length: Option<usize>,
    /// Whether minimization still considers this input a contributor.
    pub essential: bool,
}

impl Input {
    /// Build an input, inferring `length` from the literal when the
    /// declarator had a bare `[]` size.
    pub fn new(
        name: &str,
        value: &str,
        scope: Scope,
        is_declared: bool,
        ty: Option<CType>,
        explicit_len: Option<usize>,
        is_array: bool,
    ) -> Self {
        let length = explicit_len.or_else(|| {
            if is_array || value.starts_with('"') {
                infer_length(value)
            } else {
                None
            }
        });
        Self {
            name: name.to_string(),
            value: value.to_string(),
            scope,
            is_declared,
            ty,
            length,
            essential: true,
        }
    }
}

/// Infer the element count of a brace literal or the byte count of a string
/// literal (content plus NUL). `None` when the literal is neither.
fn infer_length(value: &str) -> Option<usize> {
    let v = value.trim();
    if let Some(body) = v.strip_prefix('{').and_then(|rest| rest.strip_suffix('}')) {
        if body.trim().is_empty() {
            return Some(0);
        }
        return Some(body.split(',').count());
    }
    if let Some(body) = v.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')) {
        return Some(body.chars().count() + 1);
    }
    None
}

/// A seed file with mutable literals replaced by positional placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Path of the seed file.
    pub path: PathBuf,
    /// Source text with each mutable declarator replaced by `[INPUT_i]`.
    pub source_pattern: String,
    /// Placeholder index -> input, in file order.
    pub inputs: Vec<Input>,
}

static MAIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"int\s+main\s*\(").expect("static regex"));

static STRUCT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:struct|union)\b").expect("static regex"));

// An initializer literal: a brace aggregate (may contain commas), a string,
// or plain text up to the next delimiter.

/// Indented declaration with a type keyword: `    int a = 0, b;`
static LOCAL_DEF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?P<indent>\s+)(?P<quals>(?:(?:volatile|static|const|register|unsigned|signed)\s+)*)(?P<ty>int|float|double|char|long|short)(?P<seq>(?:\s+\*?\w+(?:\[[0-9]*\])?\s*(?:=\s*(?:\{[^}]*\}|"[^"]*"|[^,;]+?)\s*)?[,;])+)\s*$"#,
    )
    .expect("static regex")
});

/// Indented bare re-assignment: `    a = 1;`
static LOCAL_ASSIGN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?P<indent>\s+)(?P<seq>(?:\s*\*?\w+(?:\[[0-9]*\])?\s*=\s*(?:\{[^}]*\}|"[^"]*"|[^,;]+?)\s*[,;])+)\s*$"#,
    )
    .expect("static regex")
});

/// File-scope declaration, optionally prefixed by one qualifier word:
/// `volatile short c = 10;`
static GLOBAL_DEF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?P<quals>(?:\w+\s+)?)(?P<ty>int|float|double|char|long|short)(?P<seq>(?:\s+\*?\w+(?:\[[0-9]*\])?\s*(?:=\s*(?:\{[^}]*\}|"[^"]*"|[^,;]+?)\s*)?[,;])+)\s*$"#,
    )
    .expect("static regex")
});

/// File-scope bare assignment: `a = 1;`
static GLOBAL_ASSIGN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?P<seq>(?:\s*\*?\w+(?:\[[0-9]*\])?\s*=\s*(?:\{[^}]*\}|"[^"]*"|[^,;]+?)\s*[,;])+)\s*$"#,
    )
    .expect("static regex")
});

/// One declarator inside a matched sequence.
static DECL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?P<lead>\s*)(?P<ptr>\*?)(?P<name>\w+)(?P<arr>\[(?P<size>[0-9]*)\])?\s*(?:=\s*(?P<value>\{[^}]*\}|"[^"]*"|[^,;]+?)\s*)?(?P<sep>[,;])"#,
    )
    .expect("static regex")
});

/// The four line patterns in match order, with their scope/declaredness.
struct LinePattern {
    regex: &'static Lazy<Regex>,
    scope: Scope,
    declared: bool,
}

static LINE_PATTERNS: &[LinePattern] = &[
    LinePattern {
        regex: &LOCAL_DEF_RE,
        scope: Scope::Local,
        declared: true,
    },
    LinePattern {
        regex: &LOCAL_ASSIGN_RE,
        scope: Scope::Local,
        declared: false,
    },
    LinePattern {
        regex: &GLOBAL_DEF_RE,
        scope: Scope::Global,
        declared: true,
    },
    LinePattern {
        regex: &GLOBAL_ASSIGN_RE,
        scope: Scope::Global,
        declared: false,
    },
];

impl Template {
    /// Build a template and run type back-propagation over its inputs.
    ///
    /// A later input sharing a name with an earlier one, declared at an
    /// equal-or-narrower position (local may see global), inherits the
    /// earlier input's type when its own was not directly captured. This
    /// models re-declaration/assignment sequences in the seed corpora.
    pub fn new(path: PathBuf, source_pattern: String, mut inputs: Vec<Input>) -> Self {
        for i in 1..inputs.len() {
            if inputs[i].ty.is_some() {
                continue;
            }
            for j in (0..i).rev() {
                if inputs[j].name == inputs[i].name
                    && inputs[i].scope.rank() >= inputs[j].scope.rank()
                    && inputs[j].ty.is_some()
                {
                    inputs[i].ty = inputs[j].ty;
                    break;
                }
            }
        }
        Self {
            path,
            source_pattern,
            inputs,
        }
    }

    /// A template can be fuzzed only when it has at least one input and
    /// every input resolved a concrete type.
    pub fn is_fuzzable(&self) -> bool {
        !self.inputs.is_empty() && self.inputs.iter().all(|input| input.ty.is_some())
    }

    /// Substitute concrete input values into the pattern.
    ///
    /// Every `[INPUT_i]` placeholder is replaced by `name[len] = value` for
    /// sized inputs or `name = value` for scalars; no placeholder survives
    /// materialization.
    pub fn materialize(&self, inputs: &[Input]) -> String {
        let mut text = self.source_pattern.clone();
        for (i, input) in inputs.iter().enumerate() {
            let subscript = input
                .length
                .map(|n| format!("[{n}]"))
                .unwrap_or_default();
            let replacement = format!("{}{} = {}", input.name, subscript, input.value);
            text = text.replace(&format!("[INPUT_{i}]"), &replacement);
        }
        text
    }
}

/// Convert a C source file into a [`Template`].
///
/// Returns `None` when the file is not a viable fuzz target: no `main` entry
/// point, or longer than `max_lines` (large files are rejected to bound
/// compile time). The returned template may still be unfuzzable if some
/// input never resolved a type; callers check [`Template::is_fuzzable`].
pub fn parameterize(path: &Path, source: &str, max_lines: usize) -> Option<Template> {
    if !MAIN_RE.is_match(source) {
        debug!(path = %path.display(), "skipping seed without main entry point");
        return None;
    }
    if source.lines().count() > max_lines {
        debug!(path = %path.display(), max_lines, "skipping oversized seed");
        return None;
    }

    let mut inputs: Vec<Input> = Vec::new();
    let mut pattern = String::with_capacity(source.len());
    // Struct/union bodies are never matched. The flag is set by any line
    // containing the keyword and cleared by a line starting with `}`
    // (a brace-depth-free heuristic).
    let mut in_aggregate = false;

    for line in source.lines() {
        if in_aggregate {
            pattern.push_str(line);
            pattern.push('\n');
            if line.trim_start().starts_with('}') {
                in_aggregate = false;
            }
            continue;
        }
        if STRUCT_RE.is_match(line) {
            in_aggregate = true;
            pattern.push_str(line);
            pattern.push('\n');
            continue;
        }

        let mut emitted = false;
        for lp in LINE_PATTERNS {
            if let Some(caps) = lp.regex.captures(line) {
                let seq = caps.name("seq").map_or("", |m| m.as_str());
                let prefix_end = caps.name("seq").map_or(0, |m| m.start());
                pattern.push_str(&line[..prefix_end]);

                let ty = caps
                    .name("ty")
                    .and_then(|m| CType::from_keyword(m.as_str()));
                rewrite_declarators(seq, lp.scope, lp.declared, ty, &mut inputs, &mut pattern);
                pattern.push('\n');
                emitted = true;
                break;
            }
        }
        if !emitted {
            pattern.push_str(line);
            pattern.push('\n');
        }
    }

    Some(Template::new(path.to_path_buf(), pattern, inputs))
}

/// Walk the declarators of one matched sequence, appending either a
/// placeholder (and recording an [`Input`]) or the original text for
/// skipped pointer declarators.
fn rewrite_declarators(
    seq: &str,
    scope: Scope,
    declared: bool,
    ty: Option<CType>,
    inputs: &mut Vec<Input>,
    pattern: &mut String,
) {
    for caps in DECL_RE.captures_iter(seq) {
        let whole = caps.get(0).map_or("", |m| m.as_str());
        if caps.name("ptr").is_some_and(|m| !m.as_str().is_empty()) {
            // Pointer targets are not mutated.
            pattern.push_str(whole);
            continue;
        }
        let lead = caps.name("lead").map_or("", |m| m.as_str());
        let sep = caps.name("sep").map_or(";", |m| m.as_str());
        let name = caps.name("name").map_or("", |m| m.as_str());
        let value = caps.name("value").map_or("0", |m| m.as_str());
        let is_array = caps.name("arr").is_some();
        let explicit_len = caps
            .name("size")
            .and_then(|m| m.as_str().parse::<usize>().ok());

        let index = inputs.len();
        inputs.push(Input::new(
            name,
            value,
            scope,
            declared,
            ty,
            explicit_len,
            is_array,
        ));
        pattern.push_str(lead);
        pattern.push_str(&format!("[INPUT_{index}]"));
        pattern.push_str(sep);
    }
}
