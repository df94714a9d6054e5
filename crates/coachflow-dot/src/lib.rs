//! DOT parser for the Graphviz subset used by Coachflow pipeline files.
//!
//! Parses `digraph Name { ... }` with nodes, chained edges, `node`/`edge`
//! default blocks and typed attributes. Produces a typed AST: [`DotGraph`],
//! [`NodeDef`], [`EdgeDef`], [`AttributeValue`]. Node order and edge order
//! follow the file, since edge order decides which edge is "first" and "last"
//! for pipeline validation.
//!
//! # Example
//! ```
//! let dot = r#"digraph Pipeline { coach [role=Coach]; coach -> cap }"#;
//! let graph = coachflow_dot::parse(dot).unwrap();
//! assert_eq!(graph.name, "Pipeline");
//! assert_eq!(graph.edges.len(), 1);
//! ```

pub mod ast;
mod parser;

pub use ast::*;
pub use parser::parse;

#[cfg(test)]
mod tests {
    use super::*;

    fn text(v: Option<&AttributeValue>) -> Option<String> {
        v.map(AttributeValue::as_text)
    }

    #[test]
    fn parse_simple_linear_pipeline() {
        let graph = parse("digraph Test { coach -> coder -> cap }").unwrap();
        assert_eq!(graph.name, "Test");
        assert_eq!(graph.edges.len(), 2);
        assert_eq!(graph.edges[0].from, "coach");
        assert_eq!(graph.edges[0].to, "coder");
        assert_eq!(graph.edges[1].from, "coder");
        assert_eq!(graph.edges[1].to, "cap");
        let ids: Vec<_> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["coach", "coder", "cap"]);
    }

    #[test]
    fn parse_node_with_bare_and_quoted_values() {
        let graph = parse(
            r#"digraph G {
                b1 [role=Before, choice="C", prompt="be brief", selected=true]
            }"#,
        )
        .unwrap();
        let node = graph.node("b1").unwrap();
        assert_eq!(text(node.attrs.get("role")).as_deref(), Some("Before"));
        assert_eq!(text(node.attrs.get("choice")).as_deref(), Some("C"));
        assert_eq!(text(node.attrs.get("prompt")).as_deref(), Some("be brief"));
        assert_eq!(node.attrs.get("selected"), Some(&AttributeValue::Boolean(true)));
    }

    #[test]
    fn numeric_and_quoted_node_ids() {
        let graph = parse(
            r#"digraph {
                1 [role=Coach]
                "x-Y_z" [role=Capitalizer]
                1 -> "x-Y_z" [id=e1]
            }"#,
        )
        .unwrap();
        assert_eq!(graph.name, "");
        assert!(graph.node("1").is_some());
        assert!(graph.node("x-Y_z").is_some());
        assert_eq!(graph.edges[0].to, "x-Y_z");
        assert_eq!(text(graph.edges[0].attrs.get("id")).as_deref(), Some("e1"));
    }

    #[test]
    fn node_order_follows_first_appearance() {
        let graph = parse(
            r#"digraph G {
                z -> a
                m [role=Coder]
                a -> m
            }"#,
        )
        .unwrap();
        let ids: Vec<_> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }

    #[test]
    fn repeated_node_statements_merge_attributes() {
        let graph = parse(
            r#"digraph G {
                a [role=Coach]
                a -> b
                a [selected=true]
            }"#,
        )
        .unwrap();
        let a = graph.node("a").unwrap();
        assert_eq!(text(a.attrs.get("role")).as_deref(), Some("Coach"));
        assert_eq!(a.attrs.get("selected"), Some(&AttributeValue::Boolean(true)));
        assert_eq!(graph.nodes.len(), 2);
    }

    #[test]
    fn node_defaults_apply_to_later_nodes() {
        let graph = parse(
            r#"digraph G {
                first
                node [role=Coder]
                second
                first -> third
            }"#,
        )
        .unwrap();
        assert!(graph.node("first").unwrap().attrs.get("role").is_none());
        assert_eq!(
            text(graph.node("second").unwrap().attrs.get("role")).as_deref(),
            Some("Coder")
        );
        assert_eq!(
            text(graph.node("third").unwrap().attrs.get("role")).as_deref(),
            Some("Coder")
        );
    }

    #[test]
    fn integers_and_signs() {
        let graph = parse("digraph G { a [weight=12, offset=-3] }").unwrap();
        let a = graph.node("a").unwrap();
        assert_eq!(a.attrs.get("weight"), Some(&AttributeValue::Integer(12)));
        assert_eq!(a.attrs.get("offset"), Some(&AttributeValue::Integer(-3)));
    }

    #[test]
    fn comment_stripping() {
        let input = r#"
            // pipeline
            digraph G {
                /* block */
                A -> B // inline
            }
        "#;
        let graph = parse(input).unwrap();
        assert_eq!(graph.edges.len(), 1);
    }

    #[test]
    fn string_escapes() {
        let graph = parse(r#"digraph G { A [prompt="line1\nline2\t\"q\""] }"#).unwrap();
        assert_eq!(
            text(graph.node("A").unwrap().attrs.get("prompt")).as_deref(),
            Some("line1\nline2\t\"q\"")
        );
    }

    #[test]
    fn graph_attrs() {
        let graph = parse(
            r#"digraph G {
                graph [rankdir=LR]
                label = "My Pipeline"
            }"#,
        )
        .unwrap();
        assert_eq!(text(graph.attrs.get("rankdir")).as_deref(), Some("LR"));
        assert_eq!(text(graph.attrs.get("label")).as_deref(), Some("My Pipeline"));
    }

    #[test]
    fn reject_undirected_and_subgraphs() {
        assert!(parse("graph G { A -- B }").is_err());
        assert!(parse("digraph G { A -- B }").is_err());
        assert!(parse("digraph G { subgraph cluster { A } }").is_err());
    }

    #[test]
    fn trailing_content_is_an_error() {
        assert!(parse("digraph G { A } extra").is_err());
    }

    #[test]
    fn error_includes_line_and_col() {
        let err = parse("digraph G {\n  A -> \n}").unwrap_err();
        match err {
            coachflow_types::CoachflowError::ParseError { line, col, .. } => {
                assert!(line >= 2);
                assert!(col >= 1);
            }
            other => panic!("expected ParseError, got {other:?}"),
        }
    }
}
