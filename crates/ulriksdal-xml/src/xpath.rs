#![forbid(unsafe_code)]

//! XPath subset for the XPath filter transform.
//!
//! The filter evaluates one boolean expression per node of the input
//! node-set, with that node as the context node. Signatures in the wild
//! use a narrow slice of XPath for this, and that slice is what is
//! supported here:
//!
//! - `or`, `and`, `not(...)`, parentheses, `true()`, `false()`, numbers
//! - single location steps on the `self`, `child`, `parent`, `ancestor`,
//!   `ancestor-or-self`, `descendant`, `descendant-or-self` and
//!   `attribute` (`@`) axes
//! - node tests `*`, `prefix:name`, `name`, `node()`, `text()`,
//!   `comment()`, `processing-instruction()`
//! - `step = 'literal'` and `step != 'literal'` comparisons
//!
//! A step used as a boolean is true when it selects at least one node.

use std::collections::BTreeMap;

use roxmltree::{Node, NodeType};
use ulriksdal_core::{Error, Result};

/// A compiled filter expression.
#[derive(Debug, Clone, PartialEq)]
pub struct XPathExpr {
    root: Expr,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Bool(bool),
    Number(f64),
    Step(Step),
    Compare { step: Step, value: String, equal: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    SelfAxis,
    Child,
    Parent,
    Ancestor,
    AncestorOrSelf,
    Descendant,
    DescendantOrSelf,
    Attribute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeTest {
    AnyNode,
    AnyPrincipal,
    Name { ns: Option<String>, local: String },
    Text,
    Comment,
    Pi,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    test: NodeTest,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    At,
    Star,
    Eq,
    Neq,
    DoubleColon,
    Colon,
    Literal(String),
    Number(f64),
    Name(String),
}

impl XPathExpr {
    /// Compile `expr`, resolving prefixes through `namespaces`.
    pub fn compile(expr: &str, namespaces: &BTreeMap<String, String>) -> Result<Self> {
        let tokens = tokenize(expr)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            namespaces,
        };
        let root = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(Error::Transform(format!(
                "unexpected trailing input in XPath expression: {expr}"
            )));
        }
        Ok(Self { root })
    }

    /// Evaluate the expression with `node` as the context node.
    pub fn evaluate(&self, node: Node<'_, '_>) -> bool {
        eval(&self.root, node)
    }
}

fn eval(expr: &Expr, node: Node<'_, '_>) -> bool {
    match expr {
        Expr::Or(a, b) => eval(a, node) || eval(b, node),
        Expr::And(a, b) => eval(a, node) && eval(b, node),
        Expr::Not(e) => !eval(e, node),
        Expr::Bool(b) => *b,
        Expr::Number(n) => *n != 0.0 && !n.is_nan(),
        Expr::Step(step) => !step_values(step, node, false).is_empty(),
        Expr::Compare { step, value, equal } => {
            let values = step_values(step, node, true);
            if *equal {
                values.iter().any(|v| v == value)
            } else {
                values.iter().any(|v| v != value)
            }
        }
    }
}

/// String values of the nodes `step` selects from `node`. When `want_values`
/// is false the strings are left empty and only the count matters.
fn step_values(step: &Step, node: Node<'_, '_>, want_values: bool) -> Vec<String> {
    if step.axis == Axis::Attribute {
        if !node.is_element() {
            return Vec::new();
        }
        return node
            .attributes()
            .filter(|a| match &step.test {
                NodeTest::AnyNode | NodeTest::AnyPrincipal => true,
                NodeTest::Name { ns, local } => {
                    a.name() == local && a.namespace() == ns.as_deref()
                }
                _ => false,
            })
            .map(|a| if want_values { a.value().to_owned() } else { String::new() })
            .collect();
    }

    let candidates: Vec<Node<'_, '_>> = match step.axis {
        Axis::SelfAxis => vec![node],
        Axis::Child => node.children().collect(),
        Axis::Parent => node.parent().into_iter().collect(),
        Axis::Ancestor => node.ancestors().skip(1).collect(),
        Axis::AncestorOrSelf => node.ancestors().collect(),
        Axis::Descendant => node.descendants().skip(1).collect(),
        Axis::DescendantOrSelf => node.descendants().collect(),
        Axis::Attribute => Vec::new(),
    };
    candidates
        .into_iter()
        .filter(|n| matches_test(&step.test, n))
        .map(|n| if want_values { string_value(n) } else { String::new() })
        .collect()
}

fn matches_test(test: &NodeTest, n: &Node<'_, '_>) -> bool {
    match test {
        NodeTest::AnyNode => true,
        NodeTest::AnyPrincipal => n.is_element(),
        NodeTest::Name { ns, local } => {
            n.is_element() && n.tag_name().name() == local && n.tag_name().namespace() == ns.as_deref()
        }
        NodeTest::Text => n.is_text(),
        NodeTest::Comment => n.is_comment(),
        NodeTest::Pi => n.node_type() == NodeType::PI,
    }
}

fn string_value(n: Node<'_, '_>) -> String {
    match n.node_type() {
        NodeType::Root | NodeType::Element => n
            .descendants()
            .filter(|d| d.is_text())
            .filter_map(|d| d.text())
            .collect(),
        _ => n.text().unwrap_or("").to_owned(),
    }
}

fn tokenize(expr: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '@' => {
                tokens.push(Token::At);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Neq);
                i += 2;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                tokens.push(Token::DoubleColon);
                i += 2;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&x| x == c)
                    .ok_or_else(|| Error::Transform(format!("unterminated literal in XPath: {expr}")))?;
                tokens.push(Token::Literal(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| Error::Transform(format!("invalid number in XPath: {text}")))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '-' | '.'))
                {
                    i += 1;
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            other => {
                return Err(Error::Transform(format!(
                    "unsupported character '{other}' in XPath expression"
                )))
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    namespaces: &'a BTreeMap<String, String>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            other => Err(Error::Transform(format!(
                "expected {expected:?} in XPath expression, found {other:?}"
            ))),
        }
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(n)) if n == word)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.is_keyword("or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while self.is_keyword("and") {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek().cloned() {
            Some(Token::LParen) => {
                self.pos += 1;
                let e = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(e)
            }
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Token::Literal(s)) => {
                self.pos += 1;
                Ok(Expr::Bool(!s.is_empty()))
            }
            Some(Token::Name(name)) if self.peek_at(1) == Some(&Token::LParen) => {
                match name.as_str() {
                    "not" => {
                        self.pos += 2;
                        let e = self.parse_or()?;
                        self.expect(Token::RParen)?;
                        Ok(Expr::Not(Box::new(e)))
                    }
                    "true" | "false" => {
                        self.pos += 2;
                        self.expect(Token::RParen)?;
                        Ok(Expr::Bool(name == "true"))
                    }
                    "node" | "text" | "comment" | "processing-instruction" => self.parse_comparison(),
                    other => Err(Error::Transform(format!(
                        "unsupported XPath function: {other}()"
                    ))),
                }
            }
            Some(_) => self.parse_comparison(),
            None => Err(Error::Transform("empty XPath expression".into())),
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let step = self.parse_step()?;
        let equal = match self.peek() {
            Some(Token::Eq) => true,
            Some(Token::Neq) => false,
            _ => return Ok(Expr::Step(step)),
        };
        self.pos += 1;
        match self.next() {
            Some(Token::Literal(value)) => Ok(Expr::Compare { step, value, equal }),
            Some(Token::Number(n)) => Ok(Expr::Compare {
                step,
                value: n.to_string(),
                equal,
            }),
            other => Err(Error::Transform(format!(
                "expected literal after comparison in XPath, found {other:?}"
            ))),
        }
    }

    fn parse_step(&mut self) -> Result<Step> {
        let axis = if self.peek() == Some(&Token::At) {
            self.pos += 1;
            Axis::Attribute
        } else if let (Some(Token::Name(name)), Some(Token::DoubleColon)) =
            (self.peek().cloned(), self.peek_at(1))
        {
            self.pos += 2;
            match name.as_str() {
                "self" => Axis::SelfAxis,
                "child" => Axis::Child,
                "parent" => Axis::Parent,
                "ancestor" => Axis::Ancestor,
                "ancestor-or-self" => Axis::AncestorOrSelf,
                "descendant" => Axis::Descendant,
                "descendant-or-self" => Axis::DescendantOrSelf,
                "attribute" => Axis::Attribute,
                other => {
                    return Err(Error::Transform(format!("unsupported XPath axis: {other}")))
                }
            }
        } else {
            Axis::Child
        };
        let test = self.parse_node_test()?;
        Ok(Step { axis, test })
    }

    fn parse_node_test(&mut self) -> Result<NodeTest> {
        match self.next() {
            Some(Token::Star) => Ok(NodeTest::AnyPrincipal),
            Some(Token::Name(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    self.expect(Token::RParen)?;
                    return match name.as_str() {
                        "node" => Ok(NodeTest::AnyNode),
                        "text" => Ok(NodeTest::Text),
                        "comment" => Ok(NodeTest::Comment),
                        "processing-instruction" => Ok(NodeTest::Pi),
                        other => Err(Error::Transform(format!("unsupported node test: {other}()"))),
                    };
                }
                if self.peek() == Some(&Token::Colon) {
                    self.pos += 1;
                    let uri = self
                        .namespaces
                        .get(&name)
                        .cloned()
                        .ok_or_else(|| Error::Transform(format!("unbound XPath prefix: {name}")))?;
                    return match self.next() {
                        Some(Token::Name(local)) => Ok(NodeTest::Name {
                            ns: Some(uri),
                            local,
                        }),
                        other => Err(Error::Transform(format!(
                            "expected local name after '{name}:', found {other:?}"
                        ))),
                    };
                }
                Ok(NodeTest::Name {
                    ns: None,
                    local: name,
                })
            }
            other => Err(Error::Transform(format!(
                "expected node test in XPath expression, found {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::XmlDocument;

    const DSIG: &str = "http://www.w3.org/2000/09/xmldsig#";

    fn dsig_ns() -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        m.insert("dsig".to_owned(), DSIG.to_owned());
        m
    }

    #[test]
    fn test_enveloped_expression() {
        let xml = format!(
            r#"<r><a>1</a><Signature xmlns="{DSIG}"><SignedInfo/></Signature></r>"#
        );
        let doc = XmlDocument::parse(xml).unwrap();
        let parsed = doc.parse_doc().unwrap();
        let expr = XPathExpr::compile("not(ancestor-or-self::dsig:Signature)", &dsig_ns()).unwrap();
        let kept: Vec<&str> = parsed
            .descendants()
            .filter(|n| n.is_element() && expr.evaluate(*n))
            .map(|n| n.tag_name().name())
            .collect();
        assert_eq!(kept, vec!["r", "a"]);
    }

    #[test]
    fn test_attribute_comparison() {
        let doc = XmlDocument::parse(r#"<r><a k="x"/><a k="y"/><a/></r>"#).unwrap();
        let parsed = doc.parse_doc().unwrap();
        let expr = XPathExpr::compile("self::a and @k != 'y'", &BTreeMap::new()).unwrap();
        let hits = parsed.descendants().filter(|n| expr.evaluate(*n)).count();
        assert_eq!(hits, 1);
    }

    #[test]
    fn test_node_type_tests() {
        let doc = XmlDocument::parse("<r>t<!--c--></r>").unwrap();
        let parsed = doc.parse_doc().unwrap();
        let expr = XPathExpr::compile("self::text() or self::comment()", &BTreeMap::new()).unwrap();
        assert_eq!(parsed.descendants().filter(|n| expr.evaluate(*n)).count(), 2);
        let one = XPathExpr::compile("1", &BTreeMap::new()).unwrap();
        assert!(one.evaluate(parsed.root()));
    }

    #[test]
    fn test_compile_errors() {
        assert!(XPathExpr::compile("count(//a)", &BTreeMap::new()).is_err());
        assert!(XPathExpr::compile("ancestor::x:y", &BTreeMap::new()).is_err());
        assert!(XPathExpr::compile("not(self::a", &BTreeMap::new()).is_err());
    }
}
