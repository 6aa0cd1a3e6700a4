//! A small S-expression reader/writer for KiCad's `.kicad_sch` format.
//!
//! This is the "codec" collaborator spec.md places out of scope for the
//! synchronization core: it only has to parse a sheet into a tree, let the
//! core read/patch the handful of tokens it understands (`symbol`,
//! `reference`, `property`, `at`, `uuid`, `sheet`, `hierarchical_label`,
//! `pin`, ...), and re-emit the file with every other node byte-identical.
//!
//! Two things make that possible:
//!
//! - every parsed node carries its source [`Span`], so an edit can be
//!   expressed as "replace these bytes" rather than "rebuild the tree" ([`PatchSet`]);
//! - [`Sexpr::walk`] lets a caller find the nodes it cares about without the
//!   core needing to know the full grammar of everything else in the file.

pub mod kicad;

use std::fmt;

/// A node's position in the source text, used to patch in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// A node built in memory (never parsed) has no source bytes to patch.
    pub fn synthetic() -> Self {
        Self { start: 0, end: 0 }
    }

    pub fn is_synthetic(&self) -> bool {
        self.start == 0 && self.end == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SexprKind {
    Symbol(String),
    String(String),
    Int(i64),
    Float(f64),
    List(Vec<Sexpr>),
}

#[derive(Debug, Clone)]
pub struct Sexpr {
    pub kind: SexprKind,
    pub span: Span,
}

impl PartialEq for Sexpr {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Sexpr {
    pub fn with_span(kind: SexprKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn symbol(s: impl Into<String>) -> Self {
        Self::with_span(SexprKind::Symbol(s.into()), Span::synthetic())
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::with_span(SexprKind::String(s.into()), Span::synthetic())
    }

    pub fn int(n: i64) -> Self {
        Self::with_span(SexprKind::Int(n), Span::synthetic())
    }

    pub fn float(n: f64) -> Self {
        Self::with_span(SexprKind::Float(n), Span::synthetic())
    }

    pub fn list(items: Vec<Sexpr>) -> Self {
        Self::with_span(SexprKind::List(items), Span::synthetic())
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, SexprKind::List(_))
    }

    pub fn as_sym(&self) -> Option<&str> {
        match &self.kind {
            SexprKind::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            SexprKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match &self.kind {
            SexprKind::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match &self.kind {
            SexprKind::Int(n) => Some(*n as f64),
            SexprKind::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Sexpr]> {
        match &self.kind {
            SexprKind::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Sexpr>> {
        match &mut self.kind {
            SexprKind::List(items) => Some(items),
            _ => None,
        }
    }

    /// `(tag ...)` child list, first-match.
    pub fn find_list(&self, tag: &str) -> Option<&[Sexpr]> {
        find_child_list(self.as_list()?, tag)
    }

    /// All `(tag ...)` child lists, in document order.
    pub fn find_all_lists(&self, tag: &str) -> Vec<&[Sexpr]> {
        let Some(items) = self.as_list() else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| item.as_list())
            .filter(|list| list.first().and_then(Sexpr::as_sym) == Some(tag))
            .collect()
    }

    /// Depth-first walk, giving the callback the ancestor chain so it can
    /// tell e.g. "this string is the value of a `reference` property inside
    /// a `symbol`" without re-deriving the path itself.
    pub fn walk<'a, F>(&'a self, mut visit: F)
    where
        F: for<'b> FnMut(&'a Sexpr, WalkCtx<'a, 'b>),
    {
        let mut ancestors: Vec<&'a Sexpr> = Vec::new();
        walk_inner(self, &mut ancestors, None, &mut visit);
    }

    pub fn walk_strings<'a, F>(&'a self, mut visit: F)
    where
        F: for<'b> FnMut(&'a str, Span, WalkCtx<'a, 'b>),
    {
        self.walk(|node, ctx| {
            if let SexprKind::String(s) = &node.kind {
                visit(s, node.span, ctx);
            }
        });
    }
}

fn walk_inner<'a, F>(
    node: &'a Sexpr,
    ancestors: &mut Vec<&'a Sexpr>,
    index_in_parent: Option<usize>,
    visit: &mut F,
) where
    F: for<'b> FnMut(&'a Sexpr, WalkCtx<'a, 'b>),
{
    visit(
        node,
        WalkCtx {
            ancestors,
            index_in_parent,
        },
    );
    if let Some(children) = node.as_list() {
        ancestors.push(node);
        for (i, child) in children.iter().enumerate() {
            walk_inner(child, ancestors, Some(i), visit);
        }
        ancestors.pop();
    }
}

#[derive(Debug, Clone)]
pub struct WalkCtx<'a, 'b> {
    pub ancestors: &'b [&'a Sexpr],
    pub index_in_parent: Option<usize>,
}

impl<'a, 'b> WalkCtx<'a, 'b> {
    pub fn parent(&self) -> Option<&'a Sexpr> {
        self.ancestors.last().copied()
    }

    pub fn parent_tag(&self) -> Option<&'a str> {
        self.parent()?.as_list()?.first()?.as_sym()
    }

    pub fn grandparent(&self) -> Option<&'a Sexpr> {
        let n = self.ancestors.len();
        (n >= 2).then(|| self.ancestors[n - 2])
    }

    pub fn grandparent_tag(&self) -> Option<&'a str> {
        self.grandparent()?.as_list()?.first()?.as_sym()
    }
}

/// `(tag ...)` direct child of `list`, first match.
pub fn find_child_list<'a>(list: &'a [Sexpr], tag: &str) -> Option<&'a [Sexpr]> {
    list.iter()
        .filter_map(Sexpr::as_list)
        .find(|item| item.first().and_then(Sexpr::as_sym) == Some(tag))
}

pub fn find_child_list_mut<'a>(list: &'a mut [Sexpr], tag: &str) -> Option<&'a mut Vec<Sexpr>> {
    list.iter_mut()
        .filter(|item| {
            item.as_list()
                .and_then(|l| l.first())
                .and_then(Sexpr::as_sym)
                == Some(tag)
        })
        .find_map(Sexpr::as_list_mut)
}

/// Coerce an `Int` or `Float` atom to `f64` — KiCad mixes both for the same
/// logical field depending on whether the value happens to be integral.
pub fn number_as_f64(node: &Sexpr) -> Option<f64> {
    node.as_number()
}

impl From<&str> for Sexpr {
    fn from(s: &str) -> Self {
        Sexpr::symbol(s)
    }
}

impl From<String> for Sexpr {
    fn from(s: String) -> Self {
        Sexpr::symbol(s)
    }
}

impl From<f64> for Sexpr {
    fn from(n: f64) -> Self {
        Sexpr::float(n)
    }
}

impl From<i64> for Sexpr {
    fn from(n: i64) -> Self {
        Sexpr::int(n)
    }
}

/// Incrementally build a `(tag ...)` list.
#[derive(Debug, Default)]
pub struct ListBuilder {
    items: Vec<Sexpr>,
}

impl ListBuilder {
    pub fn node(tag: impl Into<Sexpr>) -> Self {
        Self {
            items: vec![tag.into()],
        }
    }

    pub fn push(mut self, v: impl Into<Sexpr>) -> Self {
        self.items.push(v.into());
        self
    }

    pub fn push_if(self, cond: bool, v: impl Into<Sexpr>) -> Self {
        if cond {
            self.push(v)
        } else {
            self
        }
    }

    pub fn build(self) -> Sexpr {
        Sexpr::list(self.items)
    }
}

// --- parsing -----------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    UnexpectedEof,
    Expected(char, char),
    UnclosedList,
    UnterminatedString,
    EmptyAtom,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedEof => write!(f, "unexpected end of input"),
            ParseError::Expected(want, got) => write!(f, "expected '{want}', found '{got}'"),
            ParseError::UnclosedList => write!(f, "unclosed list"),
            ParseError::UnterminatedString => write!(f, "unterminated string"),
            ParseError::EmptyAtom => write!(f, "empty atom"),
        }
    }
}

impl std::error::Error for ParseError {}

pub fn parse(input: &str) -> Result<Sexpr, ParseError> {
    Parser::new(input).parse_one()
}

pub fn parse_all(input: &str) -> Result<Vec<Sexpr>, ParseError> {
    Parser::new(input).parse_all()
}

struct Parser<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
            pos: 0,
        }
    }

    fn parse_all(&mut self) -> Result<Vec<Sexpr>, ParseError> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia();
            if self.at_end() {
                return Ok(out);
            }
            out.push(self.parse_one()?);
        }
    }

    fn parse_one(&mut self) -> Result<Sexpr, ParseError> {
        self.skip_trivia();
        match self.peek() {
            None => Err(ParseError::UnexpectedEof),
            Some('(') => self.parse_list(),
            Some('"') => self.parse_string(),
            Some(_) => self.parse_atom(),
        }
    }

    fn parse_list(&mut self) -> Result<Sexpr, ParseError> {
        let start = self.pos;
        self.expect('(')?;
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                None => return Err(ParseError::UnclosedList),
                Some(')') => {
                    self.advance();
                    break;
                }
                Some(_) => items.push(self.parse_one()?),
            }
        }
        Ok(Sexpr::with_span(SexprKind::List(items), Span::new(start, self.pos)))
    }

    fn parse_string(&mut self) -> Result<Sexpr, ParseError> {
        let start = self.pos;
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(ParseError::UnterminatedString),
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    let escaped = match self.peek() {
                        Some('n') => '\n',
                        Some('r') => '\r',
                        Some('t') => '\t',
                        Some(c) => c,
                        None => return Err(ParseError::UnterminatedString),
                    };
                    out.push(escaped);
                    self.advance();
                }
                Some(c) => {
                    out.push(c);
                    self.advance();
                }
            }
        }
        Ok(Sexpr::with_span(SexprKind::String(out), Span::new(start, self.pos)))
    }

    fn parse_atom(&mut self) -> Result<Sexpr, ParseError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == '(' || c == ')' {
                break;
            }
            self.advance();
        }
        if self.pos == start {
            return Err(ParseError::EmptyAtom);
        }
        let text = &self.input[start..self.pos];
        let span = Span::new(start, self.pos);
        if let Ok(i) = text.parse::<i64>() {
            Ok(Sexpr::with_span(SexprKind::Int(i), span))
        } else if let Ok(f) = text.parse::<f64>() {
            Ok(Sexpr::with_span(SexprKind::Float(f), span))
        } else {
            Ok(Sexpr::with_span(SexprKind::Symbol(text.to_string()), span))
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some(';') => {
                    while let Some(c) = self.peek() {
                        self.advance();
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn advance(&mut self) {
        if let Some((pos, c)) = self.chars.next() {
            self.pos = pos + c.len_utf8();
        }
    }

    fn expect(&mut self, want: char) -> Result<(), ParseError> {
        match self.peek() {
            Some(c) if c == want => {
                self.advance();
                Ok(())
            }
            Some(c) => Err(ParseError::Expected(want, c)),
            None => Err(ParseError::UnexpectedEof),
        }
    }

    fn at_end(&mut self) -> bool {
        self.chars.peek().is_none()
    }
}

// --- byte-stable patching ------------------------------------------------

#[derive(Debug, Clone)]
struct Patch {
    span: Span,
    text: String,
}

/// A set of source-text replacements, applied in one forward pass. This is
/// the mechanism that lets the Edit Applier (spec §4.6) mutate a handful of
/// tokens while the rest of the file — every opaque blob — streams through
/// untouched.
#[derive(Debug, Default, Clone)]
pub struct PatchSet {
    patches: Vec<Patch>,
}

impl PatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_string(&mut self, span: Span, new_value: &str) {
        self.patches.push(Patch {
            span,
            text: format!("\"{}\"", escape(new_value)),
        });
    }

    pub fn replace_raw(&mut self, span: Span, text: String) {
        self.patches.push(Patch { span, text });
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn write_to<W: std::io::Write>(&self, source: &str, mut out: W) -> std::io::Result<()> {
        if self.patches.is_empty() {
            return out.write_all(source.as_bytes());
        }
        let mut sorted: Vec<&Patch> = self.patches.iter().collect();
        sorted.sort_by_key(|p| p.span.start);

        let mut cursor = 0;
        for patch in sorted {
            if patch.span.start < cursor {
                // Overlapping patches indicate a bug upstream in the Edit
                // Applier; better to surface corrupted output loudly.
                panic!("overlapping PatchSet entries at byte {}", patch.span.start);
            }
            out.write_all(&source.as_bytes()[cursor..patch.span.start])?;
            out.write_all(patch.text.as_bytes())?;
            cursor = patch.span.end;
        }
        out.write_all(&source.as_bytes()[cursor..])?;
        Ok(())
    }

    pub fn apply(&self, source: &str) -> String {
        let mut buf = Vec::new();
        self.write_to(source, &mut buf).expect("writing to Vec is infallible");
        String::from_utf8(buf).expect("patches preserve UTF-8 boundaries")
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

// --- pretty-printing (for freshly constructed nodes) ---------------------

/// Render a freshly-built [`Sexpr`] (one with synthetic spans) the way KiCad
/// itself would format it. Only used for nodes the Edit Applier constructs
/// from scratch (new components, new labels); everything parsed from disk
/// is emitted via [`PatchSet`] instead and never passes through here.
pub fn format_sexpr(node: &Sexpr, indent: usize) -> String {
    let pad = "  ".repeat(indent);
    match &node.kind {
        SexprKind::Symbol(s) => format!("{pad}{s}"),
        SexprKind::String(s) => format!("{pad}\"{}\"", escape(s)),
        SexprKind::Int(n) => format!("{pad}{n}"),
        SexprKind::Float(f) => format!("{pad}{}", trim_float(*f)),
        SexprKind::List(items) => format_list(items, indent, &pad),
    }
}

fn format_list(items: &[Sexpr], indent: usize, pad: &str) -> String {
    if items.is_empty() {
        return format!("{pad}()");
    }
    if is_inline_form(items) {
        let body: Vec<String> = items.iter().map(|i| format_sexpr(i, 0).trim().to_string()).collect();
        return format!("{pad}({})", body.join(" "));
    }
    let mut out = format!("{pad}({}", format_sexpr(&items[0], 0).trim());
    for item in &items[1..] {
        out.push('\n');
        out.push_str(&format_sexpr(item, indent + 1));
    }
    out.push('\n');
    out.push_str(pad);
    out.push(')');
    out
}

fn trim_float(f: f64) -> String {
    let mut s = format!("{f}");
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    s
}

/// Forms KiCad always keeps on one line, regardless of nesting depth.
fn is_inline_form(items: &[Sexpr]) -> bool {
    if let Some(tag) = items.first().and_then(Sexpr::as_sym) {
        match tag {
            "at" | "xy" | "size" | "length" | "width" | "uuid" | "lib_id" | "reference"
            | "unit" | "number" | "name" | "page" | "paper" | "effects" => return true,
            "justify" if items.len() <= 3 => return true,
            _ => {}
        }
    }
    items.len() <= 2
        && items.iter().all(|i| {
            matches!(
                i.kind,
                SexprKind::Symbol(_) | SexprKind::String(_) | SexprKind::Int(_) | SexprKind::Float(_)
            )
        })
}

impl fmt::Display for Sexpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_sexpr(self, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_lists() {
        let parsed = parse("(symbol (at 1.0 2.0 90) (uuid \"abc\"))").unwrap();
        let items = parsed.as_list().unwrap();
        assert_eq!(items[0].as_sym(), Some("symbol"));
        let at = parsed.find_list("at").unwrap();
        assert_eq!(at[1].as_number(), Some(1.0));
        assert_eq!(at[3].as_number(), Some(90.0));
    }

    #[test]
    fn round_trips_byte_identical_with_no_patches() {
        let source = "(kicad_sch (version 20231120) (uuid \"x\") (wire (pts (xy 0 0) (xy 1 1))))";
        let parsed = parse(source).unwrap();
        let patches = PatchSet::new();
        assert_eq!(patches.apply(source), source);
        // Sanity: we actually parsed something, not skipped the file.
        assert!(parsed.find_list("wire").is_some());
    }

    #[test]
    fn patch_replaces_only_targeted_span_byte_stable_elsewhere() {
        let source = r#"(property "Value" "10k" (at 0 0 0))"#;
        let parsed = parse(source).unwrap();
        let value_span = parsed.as_list().unwrap()[2].span;

        let mut patches = PatchSet::new();
        patches.replace_string(value_span, "22k");
        let patched = patches.apply(source);

        assert_eq!(patched, r#"(property "Value" "22k" (at 0 0 0))"#);
    }

    #[test]
    fn walk_reports_parent_tag() {
        let parsed = parse(r#"(symbol (property "Reference" "R1"))"#).unwrap();
        let mut seen_inside_property = false;
        parsed.walk_strings(|value, _span, ctx| {
            if value == "R1" {
                seen_inside_property = ctx.parent_tag() == Some("property");
            }
        });
        assert!(seen_inside_property);
    }
}
