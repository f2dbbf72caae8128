//! Line-oriented structural outline of a script.
//!
//! The scripted engine and the outline reflector both work from a
//! [`ScriptOutline`]: a single parse that finds function declarations,
//! branch points with their alternatives, executable expression lines
//! and call sites. It understands a small block-formatted dialect —
//! `function` declarations and expressions, `if`/`else` (braced or
//! not), `while` and `do` loops, `switch`/`case`, `//` comments — which
//! is all the scenario sources need. Statements split across lines or
//! packed several to a line are outside the dialect.

use crate::reflect::BranchInfo;

/// A function found in the outline.
#[derive(Debug, Clone)]
pub struct OutlineFunction {
    /// Declared name, `None` for anonymous function expressions
    pub name: Option<String>,
    /// Line of the declaration
    pub line: u32,
    /// Declared parameter count
    pub n_params: u32,
    /// Line the function body ends on (its closing brace)
    pub body_end: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Blank,
    Brace,
    Else,
    CaseLabel,
    FunctionDecl,
    Expression,
}

struct LineMeta {
    trimmed: String,
    kind: LineKind,
    line_no: u32,
    /// Brace depth at the start of the line, minus the line's leading
    /// closing braces; `} else {` sits at the depth of its `if`.
    depth: i32,
}

/// Structural outline of one source text.
#[derive(Debug)]
pub struct ScriptOutline {
    first_line: u32,
    last_line: u32,
    expression_lines: Vec<u32>,
    functions: Vec<OutlineFunction>,
    branches: Vec<BranchInfo>,
    calls: Vec<(u32, usize)>,
}

impl ScriptOutline {
    /// Parse `source`, numbering its first line `start_line`.
    #[must_use]
    pub fn parse(source: &str, start_line: u32) -> Self {
        let meta = analyze_lines(source, start_line);
        let functions = find_functions(&meta);

        let expression_lines: Vec<u32> = meta
            .iter()
            .filter(|m| m.kind == LineKind::Expression)
            .map(|m| m.line_no)
            .collect();

        let branches = find_branches(&meta);
        let calls = find_calls(&meta, &functions);

        let last_line = meta
            .last()
            .map_or(start_line, |m| m.line_no);

        Self {
            first_line: start_line,
            last_line,
            expression_lines,
            functions,
            branches,
            calls,
        }
    }

    /// First line of the outline (1 unless a shebang was stripped)
    #[must_use]
    pub fn first_line(&self) -> u32 {
        self.first_line
    }

    /// Last content line of the outline
    #[must_use]
    pub fn last_line(&self) -> u32 {
        self.last_line
    }

    /// Lines hosting at least one executable expression, ascending
    #[must_use]
    pub fn expression_lines(&self) -> &[u32] {
        &self.expression_lines
    }

    /// Functions declared in the source, in declaration order
    #[must_use]
    pub fn functions(&self) -> &[OutlineFunction] {
        &self.functions
    }

    /// Branch points with their alternatives
    #[must_use]
    pub fn branches(&self) -> &[BranchInfo] {
        &self.branches
    }

    /// Call sites: line number and index of the called function
    #[must_use]
    pub fn calls(&self) -> &[(u32, usize)] {
        &self.calls
    }

    /// The innermost function whose body contains `line`, if any. The
    /// declaration line itself belongs to the enclosing scope.
    fn owner_of(&self, line: u32) -> Option<usize> {
        self.functions
            .iter()
            .enumerate()
            .filter(|(_, f)| f.line < line && line <= f.body_end)
            .min_by_key(|(_, f)| f.body_end - f.line)
            .map(|(index, _)| index)
    }

    /// Expression lines executed when the toplevel runs
    #[must_use]
    pub fn toplevel_lines(&self) -> Vec<u32> {
        self.expression_lines
            .iter()
            .copied()
            .filter(|&line| self.owner_of(line).is_none())
            .collect()
    }

    /// Expression lines executed when function `index`'s body runs
    #[must_use]
    pub fn function_lines(&self, index: usize) -> Vec<u32> {
        self.expression_lines
            .iter()
            .copied()
            .filter(|&line| self.owner_of(line) == Some(index))
            .collect()
    }
}

fn analyze_lines(source: &str, start_line: u32) -> Vec<LineMeta> {
    let mut meta = Vec::new();
    let mut depth: i32 = 0;

    for (index, raw) in source.lines().enumerate() {
        let trimmed = strip_line_comment(raw).trim().to_owned();
        let leading_closes = trimmed
            .chars()
            .take_while(|&c| c == '}' || c.is_whitespace())
            .filter(|&c| c == '}')
            .count() as i32;
        let opens = trimmed.matches('{').count() as i32;
        let closes = trimmed.matches('}').count() as i32;

        let kind = classify(&trimmed);
        meta.push(LineMeta {
            kind,
            line_no: start_line + index as u32,
            depth: depth - leading_closes,
            trimmed,
        });

        depth += opens - closes;
    }

    meta
}

fn strip_line_comment(line: &str) -> &str {
    match line.find("//") {
        Some(index) => &line[..index],
        None => line,
    }
}

fn classify(trimmed: &str) -> LineKind {
    if trimmed.is_empty() {
        return LineKind::Blank;
    }
    if trimmed
        .chars()
        .all(|c| matches!(c, '{' | '}' | ';') || c.is_whitespace())
    {
        return LineKind::Brace;
    }
    if matches!(trimmed, "else" | "else {" | "} else" | "} else {") {
        return LineKind::Else;
    }
    if trimmed.starts_with("case ") || trimmed.starts_with("default:") {
        return LineKind::CaseLabel;
    }
    // A bare declaration is not executable, but a function expression
    // assigned to something executes as part of its statement
    if trimmed.starts_with("function") && parse_function_signature(trimmed).is_some() {
        return LineKind::FunctionDecl;
    }
    LineKind::Expression
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn find_function_keyword(s: &str) -> Option<usize> {
    let mut search_from = 0;
    while let Some(pos) = s[search_from..].find("function") {
        let abs = search_from + pos;
        let before_ok = abs == 0 || !is_ident_char(s[..abs].chars().next_back().unwrap_or(' '));
        let after = abs + "function".len();
        let after_ok = s[after..].chars().next().is_none_or(|c| !is_ident_char(c));
        if before_ok && after_ok {
            return Some(abs);
        }
        search_from = after;
    }
    None
}

/// Parses `function name(a, b)` or `function (a, b)` out of a line,
/// returning the optional name and parameter count.
fn parse_function_signature(trimmed: &str) -> Option<(Option<String>, u32)> {
    let keyword = find_function_keyword(trimmed)?;
    let after = trimmed[keyword + "function".len()..].trim_start();

    let (name, rest) = if after.starts_with('(') {
        (None, after)
    } else {
        let end = after
            .find(|c: char| !is_ident_char(c))
            .unwrap_or(after.len());
        if end == 0 {
            return None;
        }
        (Some(after[..end].to_owned()), after[end..].trim_start())
    };

    let params = rest.strip_prefix('(')?;
    let close = params.find(')')?;
    let inner = params[..close].trim();
    let n_params = if inner.is_empty() {
        0
    } else {
        inner.split(',').count() as u32
    };

    Some((name, n_params))
}

fn find_functions(meta: &[LineMeta]) -> Vec<OutlineFunction> {
    let mut functions: Vec<OutlineFunction> = Vec::new();
    // (function index, brace depth its body must return to)
    let mut open: Vec<(usize, i32)> = Vec::new();
    let mut depth: i32 = 0;

    for m in meta {
        if let Some((name, n_params)) = parse_function_signature(&m.trimmed) {
            functions.push(OutlineFunction {
                name,
                line: m.line_no,
                n_params,
                body_end: m.line_no,
            });
            open.push((functions.len() - 1, depth));
        }

        let opens = m.trimmed.matches('{').count() as i32;
        let closes = m.trimmed.matches('}').count() as i32;
        depth += opens - closes;

        while let Some(&(index, opened_at)) = open.last() {
            if depth <= opened_at {
                functions[index].body_end = m.line_no;
                open.pop();
            } else {
                break;
            }
        }
    }

    // Unterminated bodies run to the end of the source
    if let Some(last) = meta.last() {
        for (index, _) in open {
            functions[index].body_end = last.line_no;
        }
    }

    functions
}

fn is_if_head(trimmed: &str) -> bool {
    let t = trimmed.trim_start_matches('}').trim_start();
    let t = t.strip_prefix("else").map_or(t, str::trim_start);
    t.starts_with("if (") || t.starts_with("if(")
}

fn is_loop_head(trimmed: &str) -> bool {
    trimmed.starts_with("while (")
        || trimmed.starts_with("while(")
        || trimmed == "do"
        || trimmed.starts_with("do {")
        || trimmed.starts_with("do{")
}

fn is_switch_head(trimmed: &str) -> bool {
    trimmed.starts_with("switch (") || trimmed.starts_with("switch(")
}

fn is_else_ish(trimmed: &str) -> bool {
    trimmed.starts_with("else") || trimmed.starts_with("} else")
}

fn next_expression_line(meta: &[LineMeta], after: usize) -> Option<u32> {
    meta.iter()
        .skip(after + 1)
        .find(|m| m.kind == LineKind::Expression)
        .map(|m| m.line_no)
}

/// The line introducing the `else` arm of the `if` at `meta[index]`,
/// if the `if` has one.
fn find_else_arm(meta: &[LineMeta], index: usize) -> Option<usize> {
    let base = meta[index].depth;
    let braced = meta[index].trimmed.contains('{');
    let mut seen_consequent = false;

    for (j, m) in meta.iter().enumerate().skip(index + 1) {
        if m.kind == LineKind::Blank {
            continue;
        }
        if m.depth < base {
            return None;
        }
        if m.depth > base {
            continue;
        }
        match m.kind {
            LineKind::Brace => {}
            LineKind::Else => return Some(j),
            _ if is_else_ish(&m.trimmed) => return Some(j),
            _ => {
                // A further statement at this depth means the if ended
                if braced || seen_consequent {
                    return None;
                }
                seen_consequent = true;
            }
        }
    }

    None
}

fn switch_case_exits(meta: &[LineMeta], index: usize) -> Vec<u32> {
    let base = meta[index].depth;
    let mut exits = Vec::new();

    for (j, m) in meta.iter().enumerate().skip(index + 1) {
        if m.kind == LineKind::Blank {
            continue;
        }
        if m.depth <= base {
            break;
        }
        if m.kind != LineKind::CaseLabel || m.depth != base + 1 {
            continue;
        }

        // A case followed by another label has an empty consequent and
        // can never be an exit
        let consequent = meta.iter().skip(j + 1).find(|c| {
            !matches!(c.kind, LineKind::Blank | LineKind::Brace)
        });
        if let Some(consequent) = consequent {
            if consequent.kind == LineKind::Expression {
                exits.push(consequent.line_no);
            }
        }
    }

    exits
}

fn find_branches(meta: &[LineMeta]) -> Vec<BranchInfo> {
    let mut branches = Vec::new();

    for (i, m) in meta.iter().enumerate() {
        if m.kind != LineKind::Expression {
            continue;
        }

        let mut exits: Vec<u32> = Vec::new();

        if is_if_head(&m.trimmed) {
            if let Some(line) = next_expression_line(meta, i) {
                exits.push(line);
            }
            if let Some(j) = find_else_arm(meta, i) {
                // `} else if (...)` is itself executable and is the
                // alternative's first line; a plain `else` arm starts
                // at its next expression line
                let alternate = if meta[j].kind == LineKind::Expression {
                    Some(meta[j].line_no)
                } else {
                    next_expression_line(meta, j)
                };
                exits.extend(alternate);
            }
        } else if is_loop_head(&m.trimmed) {
            if let Some(line) = next_expression_line(meta, i) {
                exits.push(line);
            }
        } else if is_switch_head(&m.trimmed) {
            exits = switch_case_exits(meta, i);
        } else {
            continue;
        }

        if !exits.is_empty() {
            branches.push(BranchInfo {
                branch_point: m.line_no,
                alternatives: exits,
            });
        }
    }

    branches
}

fn find_calls(meta: &[LineMeta], functions: &[OutlineFunction]) -> Vec<(u32, usize)> {
    let mut calls = Vec::new();

    for m in meta {
        if m.kind != LineKind::Expression {
            continue;
        }

        let mut best: Option<(usize, usize)> = None;
        for (index, function) in functions.iter().enumerate() {
            let Some(name) = &function.name else { continue };
            if m.line_no == function.line {
                continue;
            }
            if let Some(pos) = find_call_of(&m.trimmed, name) {
                if best.is_none_or(|(best_pos, _)| pos < best_pos) {
                    best = Some((pos, index));
                }
            }
        }
        if let Some((_, index)) = best {
            calls.push((m.line_no, index));
        }
    }

    calls
}

fn find_call_of(line: &str, name: &str) -> Option<usize> {
    let mut search_from = 0;
    while let Some(pos) = line[search_from..].find(name) {
        let abs = search_from + pos;
        let before_ok = abs == 0 || !is_ident_char(line[..abs].chars().next_back().unwrap_or(' '));
        let after = &line[abs + name.len()..];
        if before_ok && after.trim_start().starts_with('(') {
            return Some(abs);
        }
        search_from = abs + name.len();
    }
    None
}
