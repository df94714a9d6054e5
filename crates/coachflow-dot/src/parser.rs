use std::collections::HashMap;

use winnow::ascii::{digit1, multispace0};
use winnow::combinator::{alt, opt};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::token::{literal, take_while};
use winnow::{ModalResult, Parser};

use crate::ast::*;

fn make_cut_error(desc: &'static str) -> ErrMode<ContextError<StrContext>> {
    let mut e = ContextError::new();
    e.push(StrContext::Expected(StrContextValue::Description(desc)));
    ErrMode::Cut(e)
}

/// Strip `//` line comments and `/* */` block comments, keeping newlines so
/// reported line numbers still point into the original file.
pub(crate) fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'/') => {
                for n in chars.by_ref() {
                    if n == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for n in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    if n == '\n' {
                        out.push('\n');
                    }
                    prev = n;
                }
            }
            '"' => {
                out.push('"');
                while let Some(n) = chars.next() {
                    out.push(n);
                    match n {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                out.push(escaped);
                            }
                        }
                        '"' => break,
                        _ => {}
                    }
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Whitespace consumer (including newlines).
fn ws<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    multispace0.parse_next(input)
}

/// Bare word: [A-Za-z0-9_]+. Editor-generated ids are often numeric.
fn identifier<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1.., is_id_char).parse_next(input)
}

/// Parse a double-quoted string with escape support.
fn quoted_string(input: &mut &str) -> ModalResult<String> {
    let _ = '"'.parse_next(input)?;
    let mut s = String::new();
    loop {
        let c = winnow::token::any.parse_next(input)?;
        match c {
            '"' => break,
            '\\' => {
                let esc = winnow::token::any.parse_next(input)?;
                match esc {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    '\\' => s.push('\\'),
                    '"' => s.push('"'),
                    other => {
                        s.push('\\');
                        s.push(other);
                    }
                }
            }
            other => s.push(other),
        }
    }
    Ok(s)
}

/// Node ids may be bare words or quoted strings (`"a-b"`).
fn node_id(input: &mut &str) -> ModalResult<String> {
    alt((quoted_string, identifier.map(String::from))).parse_next(input)
}

/// A bare word value: `true`/`false`, an unsigned integer, or text (`Coach`).
fn bare_value(input: &mut &str) -> ModalResult<AttributeValue> {
    let word = identifier.parse_next(input)?;
    let value = match word {
        "true" => AttributeValue::Boolean(true),
        "false" => AttributeValue::Boolean(false),
        _ => match word.parse::<i64>() {
            Ok(i) => AttributeValue::Integer(i),
            Err(_) => AttributeValue::String(word.to_string()),
        },
    };
    Ok(value)
}

/// Parse an explicitly signed integer: ('-' | '+') digits.
fn signed_integer(input: &mut &str) -> ModalResult<i64> {
    let s: &str = (alt(('-', '+')), digit1).take().parse_next(input)?;
    s.parse()
        .map_err(|_| ErrMode::Backtrack(ContextError::new()))
}

/// Parse an attribute value.
fn attr_value(input: &mut &str) -> ModalResult<AttributeValue> {
    alt((
        quoted_string.map(AttributeValue::String),
        bare_value,
        signed_integer.map(AttributeValue::Integer),
    ))
    .parse_next(input)
}

/// Parse a single attribute: key '=' value.
fn attr(input: &mut &str) -> ModalResult<(String, AttributeValue)> {
    let key = identifier.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let _ = '='.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let value = attr_value
        .context(StrContext::Expected(StrContextValue::Description(
            "attribute value",
        )))
        .parse_next(input)?;
    Ok((key.to_string(), value))
}

/// Parse an attribute block: '[' attr ( (','|';')? attr )* ']'
fn attr_block(input: &mut &str) -> ModalResult<HashMap<String, AttributeValue>> {
    let _ = '['.parse_next(input)?;
    let _ = ws.parse_next(input)?;

    let mut attrs = HashMap::new();
    if let Some((key, value)) = opt(attr).parse_next(input)? {
        attrs.insert(key, value);
        loop {
            let _ = ws.parse_next(input)?;
            let _ = opt(alt((',', ';'))).parse_next(input)?;
            let _ = ws.parse_next(input)?;
            match opt(attr).parse_next(input)? {
                Some((key, value)) => {
                    attrs.insert(key, value);
                }
                None => break,
            }
        }
    }

    let _ = ws.parse_next(input)?;
    let _ = ']'.parse_next(input)?;
    Ok(attrs)
}

/// A parsed statement, before statements are folded into a [`DotGraph`].
enum Statement {
    GraphAttrs(HashMap<String, AttributeValue>),
    NodeDefaults(HashMap<String, AttributeValue>),
    EdgeDefaults(HashMap<String, AttributeValue>),
    Node(String, HashMap<String, AttributeValue>),
    Edge(Vec<String>, HashMap<String, AttributeValue>),
    GraphAttrDecl(String, AttributeValue),
}

/// Parse `<keyword> '[' ... ']' ';'?` for the graph/node/edge default blocks.
fn keyword_block(
    keyword: &'static str,
) -> impl FnMut(&mut &str) -> ModalResult<HashMap<String, AttributeValue>> {
    move |input: &mut &str| {
        let _ = literal(keyword).parse_next(input)?;
        let _ = ws.parse_next(input)?;
        let attrs = attr_block.parse_next(input)?;
        let _ = ws.parse_next(input)?;
        let _ = opt(';').parse_next(input)?;
        Ok(attrs)
    }
}

/// Parse a node or edge statement. An edge starts as a node id followed by '->'.
fn node_or_edge_stmt(input: &mut &str) -> ModalResult<Statement> {
    let first = node_id.parse_next(input)?;
    let _ = ws.parse_next(input)?;

    if opt(literal("->")).parse_next(input)?.is_some() {
        let mut chain = vec![first];
        loop {
            let _ = ws.parse_next(input)?;
            let next = node_id
                .context(StrContext::Expected(StrContextValue::Description(
                    "edge target",
                )))
                .parse_next(input)?;
            chain.push(next);
            let _ = ws.parse_next(input)?;
            if opt(literal("->")).parse_next(input)?.is_none() {
                break;
            }
        }

        let attrs = opt(attr_block).parse_next(input)?.unwrap_or_default();
        let _ = ws.parse_next(input)?;
        let _ = opt(';').parse_next(input)?;
        return Ok(Statement::Edge(chain, attrs));
    }

    if opt(literal("--")).parse_next(input)?.is_some() {
        return Err(make_cut_error(
            "only directed edges (->); undirected edges (--) are not supported",
        ));
    }

    if let Some(attrs) = opt(attr_block).parse_next(input)? {
        let _ = ws.parse_next(input)?;
        let _ = opt(';').parse_next(input)?;
        return Ok(Statement::Node(first, attrs));
    }

    // `key = value` at graph level
    if opt('=').parse_next(input)?.is_some() {
        let _ = ws.parse_next(input)?;
        let val = attr_value.parse_next(input)?;
        let _ = ws.parse_next(input)?;
        let _ = opt(';').parse_next(input)?;
        return Ok(Statement::GraphAttrDecl(first, val));
    }

    let _ = opt(';').parse_next(input)?;
    Ok(Statement::Node(first, HashMap::new()))
}

/// Parse a single statement.
fn statement(input: &mut &str) -> ModalResult<Statement> {
    let _ = ws.parse_next(input)?;
    if let Some(rest) = input.strip_prefix("subgraph") {
        if !rest.starts_with(is_id_char) {
            return Err(make_cut_error(
                "node or edge statement (subgraphs are not supported in pipeline files)",
            ));
        }
    }
    alt((
        keyword_block("graph").map(Statement::GraphAttrs),
        keyword_block("node").map(Statement::NodeDefaults),
        keyword_block("edge").map(Statement::EdgeDefaults),
        node_or_edge_stmt,
    ))
    .parse_next(input)
}

/// Parse zero or more statements.
fn statements(input: &mut &str) -> ModalResult<Vec<Statement>> {
    let mut stmts = Vec::new();
    loop {
        let _ = ws.parse_next(input)?;
        if input.is_empty() || input.starts_with('}') {
            break;
        }
        stmts.push(statement.parse_next(input)?);
    }
    Ok(stmts)
}

/// Folds statements into a graph, applying `node`/`edge` defaults to the
/// statements that follow them.
#[derive(Default)]
struct GraphBuilder {
    attrs: HashMap<String, AttributeValue>,
    nodes: Vec<NodeDef>,
    index: HashMap<String, usize>,
    edges: Vec<EdgeDef>,
    node_defaults: HashMap<String, AttributeValue>,
    edge_defaults: HashMap<String, AttributeValue>,
}

impl GraphBuilder {
    fn touch_node(&mut self, id: &str) -> usize {
        if let Some(&i) = self.index.get(id) {
            return i;
        }
        self.nodes.push(NodeDef {
            id: id.to_string(),
            attrs: self.node_defaults.clone(),
        });
        let i = self.nodes.len() - 1;
        self.index.insert(id.to_string(), i);
        i
    }

    fn apply(&mut self, stmt: Statement) {
        match stmt {
            Statement::GraphAttrs(attrs) => self.attrs.extend(attrs),
            Statement::NodeDefaults(attrs) => self.node_defaults.extend(attrs),
            Statement::EdgeDefaults(attrs) => self.edge_defaults.extend(attrs),
            Statement::GraphAttrDecl(key, val) => {
                self.attrs.insert(key, val);
            }
            Statement::Node(id, attrs) => {
                let i = self.touch_node(&id);
                self.nodes[i].attrs.extend(attrs);
            }
            Statement::Edge(chain, attrs) => {
                for id in &chain {
                    self.touch_node(id);
                }
                for pair in chain.windows(2) {
                    let mut merged = self.edge_defaults.clone();
                    merged.extend(attrs.clone());
                    self.edges.push(EdgeDef {
                        from: pair[0].clone(),
                        to: pair[1].clone(),
                        attrs: merged,
                    });
                }
            }
        }
    }
}

/// Top-level parser: 'digraph' name? '{' statements '}'.
fn parse_digraph(input: &mut &str) -> ModalResult<DotGraph> {
    let _ = ws.parse_next(input)?;

    if input.starts_with("strict") {
        return Err(make_cut_error("'digraph' keyword (strict graphs are not supported)"));
    }
    if let Some(rest) = input.strip_prefix("graph") {
        let rest = rest.trim_start();
        if rest.starts_with('{') || rest.starts_with(is_id_char) || rest.starts_with('"') {
            return Err(make_cut_error("'digraph' keyword (undirected graphs are not supported)"));
        }
    }

    let _ = literal("digraph")
        .context(StrContext::Expected(StrContextValue::StringLiteral(
            "digraph",
        )))
        .parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let name = opt(node_id).parse_next(input)?.unwrap_or_default();
    let _ = ws.parse_next(input)?;
    let _ = '{'.parse_next(input)?;
    let stmts = statements.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let _ = '}'.parse_next(input)?;
    let _ = ws.parse_next(input)?;

    let mut builder = GraphBuilder::default();
    for stmt in stmts {
        builder.apply(stmt);
    }

    Ok(DotGraph {
        name,
        attrs: builder.attrs,
        nodes: builder.nodes,
        edges: builder.edges,
    })
}

/// Compute a 1-based (line, col) for the parse position.
fn offset_to_line_col(text: &str, remaining_len: usize) -> (usize, usize) {
    let consumed = text.len() - remaining_len;
    let prefix = &text[..consumed];
    let line = prefix.matches('\n').count() + 1;
    let col = match prefix.rfind('\n') {
        Some(pos) => consumed - pos,
        None => consumed + 1,
    };
    (line, col)
}

/// Parse a pipeline file in the supported DOT subset.
pub fn parse(input: &str) -> coachflow_types::Result<DotGraph> {
    let stripped = strip_comments(input);
    let mut remaining = stripped.as_str();

    let parsed = parse_digraph.parse_next(&mut remaining);
    match parsed {
        Ok(graph) if remaining.is_empty() => Ok(graph),
        Ok(_) => {
            let (line, col) = offset_to_line_col(&stripped, remaining.len());
            Err(coachflow_types::CoachflowError::ParseError {
                line,
                col,
                message: "unexpected content after closing '}'".into(),
                source_snippet: Some(remaining.chars().take(40).collect()),
            })
        }
        Err(e) => {
            let (line, col) = offset_to_line_col(&stripped, remaining.len());
            let snippet: String = remaining.chars().take(40).collect();
            Err(coachflow_types::CoachflowError::ParseError {
                line,
                col,
                message: e.to_string(),
                source_snippet: if snippet.is_empty() { None } else { Some(snippet) },
            })
        }
    }
}
