//! Configuration parser on top of the tree-sitter HCL grammar.
//!
//! Blocks, attributes and traversals are read off the syntax tree and
//! reduced to the byte ranges the patch engine works with. Expressions are
//! never evaluated; the only structure kept from them is the variable
//! traversals they contain.

use crate::syntax::errors::ParseError;
use crate::syntax::{
    Attribute, Block, Body, Expression, ParsedFile, Parser, SourceRange, Traversal,
    TraversalStep,
};
use ast_grep_language::{LanguageExt, SupportLang};
use tree_sitter::{Node, Tree};

/// Tree-sitter parser for the native configuration syntax.
#[derive(Debug, Clone, Copy, Default)]
pub struct HclParser;

impl HclParser {
    pub fn new() -> Self {
        Self
    }

    fn tree(&self, source: &str, filename: &str) -> Result<Tree, ParseError> {
        let mut parser = tree_sitter::Parser::new();
        let ts_lang = SupportLang::Hcl.get_ts_language();
        parser
            .set_language(&ts_lang)
            .map_err(|_| ParseError::LanguageSet)?;
        parser.parse(source, None).ok_or_else(|| ParseError::ParseFailed {
            filename: filename.to_string(),
        })
    }
}

impl Parser for HclParser {
    fn parse(&self, bytes: &[u8], filename: &str) -> Result<ParsedFile, ParseError> {
        let source = std::str::from_utf8(bytes).map_err(|e| ParseError::InvalidUtf8 {
            filename: filename.to_string(),
            offset: e.valid_up_to(),
        })?;
        let tree = self.tree(source, filename)?;
        let root = tree.root_node();
        if let Some(node) = first_error_node(root) {
            return Err(syntax_error(node, source, filename));
        }

        let reader = Reader { source, filename };
        let mut body = Body::default();
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            if child.kind() == "body" {
                body = reader.body(child);
            }
        }

        Ok(ParsedFile {
            name: filename.to_string(),
            bytes: bytes.to_vec(),
            body,
        })
    }
}

fn first_error_node(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_error_node)
}

fn syntax_error(node: Node<'_>, source: &str, filename: &str) -> ParseError {
    let message = if node.is_missing() {
        format!("missing {}", node.kind())
    } else {
        let text = source[node.byte_range()].lines().next().unwrap_or("").trim();
        format!("unexpected {text:?}")
    };
    let point = node.start_position();
    ParseError::Syntax {
        filename: filename.to_string(),
        offset: node.start_byte(),
        line: point.row + 1,
        column: point.column + 1,
        message,
    }
}

struct Reader<'s> {
    source: &'s str,
    filename: &'s str,
}

impl<'s> Reader<'s> {
    fn text(&self, node: Node<'_>) -> &'s str {
        &self.source[node.byte_range()]
    }

    fn range(&self, start: usize, end: usize) -> SourceRange {
        SourceRange::new(self.filename, start, end)
    }

    fn node_range(&self, node: Node<'_>) -> SourceRange {
        self.range(node.start_byte(), node.end_byte())
    }

    fn body(&self, node: Node<'_>) -> Body {
        let mut body = Body::default();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "attribute" => body.attributes.extend(self.attribute(child)),
                "block" => body.blocks.extend(self.block(child)),
                _ => {}
            }
        }
        body
    }

    fn attribute(&self, node: Node<'_>) -> Option<Attribute> {
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        let name = children.iter().find(|c| c.kind() == "identifier")?;
        let expr = children.iter().find(|c| c.kind() == "expression")?;

        Some(Attribute {
            name: self.text(*name).to_string(),
            name_range: self.node_range(*name),
            range: self.range(name.start_byte(), expr.end_byte()),
            expr: self.expression(*expr),
        })
    }

    fn block(&self, node: Node<'_>) -> Option<Block> {
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();

        let mut block_type = None;
        let mut labels = Vec::new();
        let mut header_end = None;
        let mut body = Body::default();
        for child in children {
            match child.kind() {
                "identifier" if block_type.is_none() => block_type = Some(child),
                "identifier" => labels.push(self.text(child).to_string()),
                "string_lit" => labels.push(unescape(self.quoted_content(child))),
                "block_start" => header_end = Some(child.end_byte()),
                "body" => body = self.body(child),
                _ => {}
            }
        }
        let block_type = block_type?;

        Some(Block {
            block_type: self.text(block_type).to_string(),
            labels,
            type_range: self.node_range(block_type),
            def_range: self.range(node.start_byte(), header_end?),
            range: self.node_range(node),
            body,
        })
    }

    fn expression(&self, node: Node<'_>) -> Expression {
        let mut collector = Collector {
            reader: self,
            found: Vec::new(),
        };
        collector.walk(node);

        Expression {
            range: self.node_range(node),
            traversals: collector.found,
            literal: self.string_literal(node),
        }
    }

    /// Text between the quotes of a `string_lit` or `quoted_template`.
    fn quoted_content(&self, node: Node<'_>) -> &'s str {
        match (node.child(0), node.child(node.child_count().saturating_sub(1))) {
            (Some(open), Some(close)) if node.child_count() >= 2 => {
                &self.source[open.end_byte()..close.start_byte()]
            }
            _ => "",
        }
    }

    /// Unescaped value of an expression that is nothing but a plain string.
    fn string_literal(&self, expr: Node<'_>) -> Option<String> {
        let inner = only_named_child(expr)?;
        let string = match inner.kind() {
            "literal_value" => only_named_child(inner).filter(|n| n.kind() == "string_lit")?,
            "template_expr" => only_named_child(inner).filter(|n| n.kind() == "quoted_template")?,
            _ => return None,
        };
        let mut cursor = string.walk();
        let templated = string.named_children(&mut cursor).any(|n| {
            matches!(n.kind(), "template_interpolation" | "template_directive")
        });
        (!templated).then(|| unescape(self.quoted_content(string)))
    }

    /// Literal index value as written, for `[0]`, `["key"]` and `.0`.
    fn literal_index(&self, index: Node<'_>) -> Option<String> {
        let inner = only_named_child(index)?;
        match inner.kind() {
            "legacy_index" => {
                let digits = self.text(inner).trim_start_matches('.').trim();
                Some(digits.to_string())
            }
            "new_index" => {
                let expr = only_named_child(inner).filter(|n| n.kind() == "expression")?;
                let literal = only_named_child(expr).filter(|n| n.kind() == "literal_value")?;
                let value = only_named_child(literal)?;
                let text = self.text(value);
                match value.kind() {
                    "numeric_lit" => Some(text.to_string()),
                    "string_lit" if !text.contains(['\\', '$', '%']) => Some(text.to_string()),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// The single named child of `node`, ignoring comments.
fn only_named_child(node: Node<'_>) -> Option<Node<'_>> {
    let mut cursor = node.walk();
    let mut children = node
        .named_children(&mut cursor)
        .filter(|n| n.kind() != "comment");
    let first = children.next()?;
    children.next().is_none().then_some(first)
}

fn unescape(raw: &str) -> String {
    let mut value = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => value.push('\n'),
                Some('t') => value.push('\t'),
                Some('r') => value.push('\r'),
                Some(other) => value.push(other),
                None => value.push('\\'),
            },
            '$' | '%' if chars.peek() == Some(&c) => {
                // `$${` and `%%{` escape a template sequence.
                chars.next();
                value.push(c);
                if chars.peek() != Some(&'{') {
                    value.push(c);
                }
            }
            c => value.push(c),
        }
    }
    value
}

/// A traversal still being extended by `.attr` and literal index steps.
struct Chain {
    start: usize,
    end: usize,
    steps: Vec<TraversalStep>,
}

/// Collects variable traversals from an expression subtree.
///
/// Expression terms are flattened in the grammar, so a traversal shows up
/// as a `variable_expr` followed by sibling `get_attr` and `index` nodes.
/// Any other sibling ends it.
struct Collector<'r, 's> {
    reader: &'r Reader<'s>,
    found: Vec<Traversal>,
}

impl Collector<'_, '_> {
    fn walk(&mut self, node: Node<'_>) {
        let open = self.sequence(node);
        self.finish(open);
    }

    /// Walk the children of `node`, returning the chain still open after
    /// its last child.
    fn sequence(&mut self, node: Node<'_>) -> Option<Chain> {
        let mut open: Option<Chain> = None;
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();

        for child in children {
            match child.kind() {
                "comment" => {}
                "variable_expr" => {
                    self.finish(open.take());
                    open = Some(Chain {
                        start: child.start_byte(),
                        end: child.end_byte(),
                        steps: vec![TraversalStep::Attr(self.reader.text(child).to_string())],
                    });
                }
                "get_attr" => {
                    if let Some(chain) = open.as_mut() {
                        let name = only_named_child(child).map(|n| self.reader.text(n));
                        chain.steps.push(TraversalStep::Attr(name.unwrap_or("").to_string()));
                        chain.end = child.end_byte();
                    }
                }
                "index" => match self.reader.literal_index(child).filter(|_| open.is_some()) {
                    Some(value) => {
                        if let Some(chain) = open.as_mut() {
                            chain.steps.push(TraversalStep::Index(value));
                            chain.end = child.end_byte();
                        }
                    }
                    None => {
                        self.finish(open.take());
                        self.walk(child);
                    }
                },
                "object_elem" => {
                    self.finish(open.take());
                    self.object_elem(child);
                }
                _ => {
                    self.finish(open.take());
                    if child.child_count() > 0 {
                        self.walk(child);
                    }
                }
            }
        }
        open
    }

    /// Naked identifier keys name the attribute and are not references.
    fn object_elem(&mut self, node: Node<'_>) {
        if let Some(key) = node.child_by_field_name("key") {
            let naked = only_named_child(key).is_some_and(|n| n.kind() == "variable_expr");
            if !naked {
                self.walk(key);
            }
        }
        if let Some(val) = node.child_by_field_name("val") {
            self.walk(val);
        }
    }

    fn finish(&mut self, chain: Option<Chain>) {
        if let Some(chain) = chain {
            self.found.push(Traversal {
                steps: chain.steps,
                range: self.reader.range(chain.start, chain.end),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> ParsedFile {
        HclParser.parse(src.as_bytes(), "main.tf").unwrap()
    }

    fn text<'a>(file: &'a ParsedFile, range: &SourceRange) -> &'a str {
        std::str::from_utf8(file.slice(range).unwrap()).unwrap()
    }

    fn traversal_texts(file: &ParsedFile, expr: &Expression) -> Vec<String> {
        expr.traversals
            .iter()
            .map(|t| text(file, &t.range).to_string())
            .collect()
    }

    #[test]
    fn test_blocks_and_ranges() {
        let src = "widget \"x\" {}\nwidget \"y\" { id = widget.x.id }\n";
        let file = parse(src);

        assert_eq!(file.blocks().len(), 2);
        let x = &file.blocks()[0];
        assert_eq!(x.block_type, "widget");
        assert_eq!(x.labels, vec!["x"]);
        assert_eq!(text(&file, &x.type_range), "widget");
        assert_eq!(text(&file, &x.range), "widget \"x\" {}");
        assert_eq!(text(&file, &x.def_range), "widget \"x\" {");

        let y = &file.blocks()[1];
        assert_eq!(text(&file, &y.range), "widget \"y\" { id = widget.x.id }");
        let id = y.body.attribute("id").unwrap();
        assert_eq!(text(&file, &id.name_range), "id");
        assert_eq!(text(&file, &id.expr.range), "widget.x.id");
        assert_eq!(text(&file, &id.range), "id = widget.x.id");
        assert_eq!(id.expr.traversals.len(), 1);
        assert_eq!(id.expr.traversals[0].attr_names(), vec!["widget", "x", "id"]);
    }

    #[test]
    fn test_outermost_block_at() {
        let src = "resource \"a\" \"b\" {\n  nested {\n    x = 1\n  }\n}\n";
        let file = parse(src);
        let pos = src.find("x = 1").unwrap();
        let block = file.outermost_block_at(pos).unwrap();
        assert_eq!(block.block_type, "resource");
        assert_eq!(block.body.blocks[0].block_type, "nested");
        assert!(file.outermost_block_at(src.len() - 1).is_none());
    }

    #[test]
    fn test_multiline_expressions_and_comments() {
        let src = r#"
# leading comment
resource "azurerm_resource_group" "test" {
  name     = "rg" # trailing
  tags = {
    env = var.env // inline
  }
  list = [
    azurerm_resource_group.other.id,
    data.azurerm_client_config.current.tenant_id,
  ]
  /* block
     comment */
}
"#;
        let file = parse(src);
        let block = &file.blocks()[0];
        assert_eq!(block.labels, vec!["azurerm_resource_group", "test"]);

        let name = block.body.attribute("name").unwrap();
        assert_eq!(text(&file, &name.expr.range), "\"rg\"");
        assert_eq!(name.expr.literal.as_deref(), Some("rg"));

        let tags = block.body.attribute("tags").unwrap();
        assert_eq!(tags.expr.traversals.len(), 1);
        assert_eq!(tags.expr.traversals[0].attr_names(), vec!["var", "env"]);
        assert!(text(&file, &tags.expr.range).ends_with('}'));

        let list = block.body.attribute("list").unwrap();
        let roots: Vec<&str> = list.expr.traversals.iter().map(Traversal::root).collect();
        assert_eq!(roots, vec!["azurerm_resource_group", "data"]);
        assert_eq!(
            text(&file, &list.expr.traversals[1].range),
            "data.azurerm_client_config.current.tenant_id"
        );
    }

    #[test]
    fn test_templates_and_heredocs() {
        let src = "locals {\n  a = \"${widget.x.name}-suffix\"\n  b = <<-EOT\n    hello ${var.who}\n    EOT\n  c = \"$${not.a.ref}\"\n}\n";
        let file = parse(src);
        let locals = &file.blocks()[0];

        let a = locals.body.attribute("a").unwrap();
        assert_eq!(a.expr.literal, None);
        assert_eq!(text(&file, &a.expr.traversals[0].range), "widget.x.name");

        let b = locals.body.attribute("b").unwrap();
        assert_eq!(b.expr.traversals[0].attr_names(), vec!["var", "who"]);
        assert!(text(&file, &b.expr.range).ends_with("EOT"));

        let c = locals.body.attribute("c").unwrap();
        assert!(c.expr.traversals.is_empty());
        assert_eq!(c.expr.literal.as_deref(), Some("${not.a.ref}"));
    }

    #[test]
    fn test_index_steps_and_function_calls() {
        let src = "x = length(widget.a[0].tags[\"k\"]) + widget.b[count.index].id + widget.c.0\n";
        let file = parse(src);
        let attr = &file.body.attributes[0];
        assert_eq!(
            traversal_texts(&file, &attr.expr),
            vec!["widget.a[0].tags[\"k\"]", "widget.b", "count.index", "widget.c.0"]
        );
        let steps = &attr.expr.traversals[0].steps;
        assert_eq!(steps[2], TraversalStep::Index("0".to_string()));
        assert_eq!(steps[4], TraversalStep::Index("\"k\"".to_string()));
        assert_eq!(
            attr.expr.traversals[3].steps[2],
            TraversalStep::Index("0".to_string())
        );
    }

    #[test]
    fn test_minus_operands_are_traversals() {
        let src = "a = -widget.x.offset\nb = 10-widget.x.n\nc = widget.x.n - widget.y.n\n";
        let file = parse(src);
        let attrs = &file.body.attributes;
        assert_eq!(traversal_texts(&file, &attrs[0].expr), vec!["widget.x.offset"]);
        assert_eq!(traversal_texts(&file, &attrs[1].expr), vec!["widget.x.n"]);
        assert_eq!(
            traversal_texts(&file, &attrs[2].expr),
            vec!["widget.x.n", "widget.y.n"]
        );
    }

    #[test]
    fn test_dashed_identifier_is_one_root() {
        let file = parse("a = my-var.x\n");
        let expr = &file.body.attributes[0].expr;
        assert_eq!(expr.traversals.len(), 1);
        assert_eq!(expr.traversals[0].root(), "my-var");
    }

    #[test]
    fn test_object_keys_are_not_traversals() {
        let src = "tags = {\n  env = var.env\n  \"quoted\" = widget.x.id\n  (var.key) = 1\n}\n";
        let file = parse(src);
        let roots: Vec<&str> = file.body.attributes[0]
            .expr
            .traversals
            .iter()
            .map(Traversal::root)
            .collect();
        assert_eq!(roots, vec!["var", "widget", "var"]);
    }

    #[test]
    fn test_splat_and_conditional() {
        let src = "a = widget.x[*].id\nb = var.on ? widget.y.id : null\n";
        let file = parse(src);
        let attrs = &file.body.attributes;
        assert_eq!(traversal_texts(&file, &attrs[0].expr), vec!["widget.x"]);
        assert_eq!(
            traversal_texts(&file, &attrs[1].expr),
            vec!["var.on", "widget.y.id"]
        );
    }

    #[test]
    fn test_for_expression_keywords_and_iterators() {
        let src = "x = [for s in var.list : upper(s) if true]\n";
        let file = parse(src);
        let roots: Vec<&str> = file.body.attributes[0]
            .expr
            .traversals
            .iter()
            .map(Traversal::root)
            .collect();
        assert_eq!(roots, vec!["var", "s"]);
    }

    #[test]
    fn test_label_escapes_and_identifier_labels() {
        let file = parse("block one \"t\\\"wo\" {}\n");
        assert_eq!(file.blocks()[0].labels, vec!["one", "t\"wo"]);
    }

    #[test]
    fn test_empty_file() {
        let file = parse("");
        assert!(file.blocks().is_empty());
        assert!(file.body.attributes.is_empty());

        let file = parse("# only a comment\n");
        assert!(file.blocks().is_empty());
    }

    #[test]
    fn test_unclosed_block_is_rejected() {
        let err = HclParser
            .parse(b"widget \"x\" {\n  a = 1\n", "main.tf")
            .unwrap_err();
        assert!(matches!(err, ParseError::Syntax { ref filename, .. } if filename == "main.tf"));
    }

    #[test]
    fn test_unterminated_string_and_bracket() {
        assert!(matches!(
            HclParser.parse(b"a = \"oops\n", "main.tf"),
            Err(ParseError::Syntax { .. })
        ));
        assert!(matches!(
            HclParser.parse(b"a = [1, 2\n", "main.tf"),
            Err(ParseError::Syntax { .. })
        ));
    }

    #[test]
    fn test_stray_token_reports_position() {
        let err = HclParser.parse(b"= 1\n", "main.tf").unwrap_err();
        match &err {
            ParseError::Syntax { line, column, .. } => assert_eq!((*line, *column), (1, 1)),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().starts_with("main.tf:1:1: syntax error"));
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        let err = HclParser.parse(b"a = \"\xff\"\n", "main.tf").unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidUtf8 {
                filename: "main.tf".to_string(),
                offset: 5,
            }
        );
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(r#"a\"b\n"#), "a\"b\n");
        assert_eq!(unescape("$${x} %%{y} $$z"), "${x} %{y} $$z");
    }
}
