//! Query language parser.
//!
//! Grammar (quoted phrases, parenthesized groups, explicit `AND`/`OR`,
//! adjacency as AND, consecutive plain words merged into one term):
//!
//! ```text
//! expr   := expr term | expr OR term
//! term   := term AND factor | factor
//! factor := quoted_phrase | multi_word | "(" expr ")"
//! WORD   := [^\s()]+
//! ```
//!
//! Nested AND/OR nodes are flattened while building, so the AST is a tagged
//! tree of [`Node`] variants with no single-child chains.

use crate::error::{Result, UctiError};

/// Tagged query AST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    And(Vec<Node>),
    Or(Vec<Node>),
    /// Quoted phrase, matched literally
    Exact(String),
    /// Joined plain words, lowercased
    Term(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
    LParen,
    RParen,
    And,
    Or,
}

fn tokenize(query: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = query.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' => {
                chars.next();
                let mut phrase = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(c) => phrase.push(c),
                        None => {
                            return Err(UctiError::QueryParse("unterminated quote".into()));
                        }
                    }
                }
                tokens.push(Token::Quoted(phrase));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(match word.as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    _ => Token::Word(word),
                });
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn starts_factor(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Word(_)) | Some(Token::Quoted(_)) | Some(Token::LParen)
        )
    }

    fn parse_expr(&mut self) -> Result<Node> {
        let mut node = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Or) => {
                    self.next();
                    let rhs = self.parse_term()?;
                    node = merge_or(node, rhs);
                }
                // Adjacency is implicit AND.
                _ if self.starts_factor() => {
                    let rhs = self.parse_term()?;
                    node = merge_and(node, rhs);
                }
                _ => return Ok(node),
            }
        }
    }

    fn parse_term(&mut self) -> Result<Node> {
        let mut node = self.parse_factor()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.next();
            let rhs = self.parse_factor()?;
            node = merge_and(node, rhs);
        }
        Ok(node)
    }

    fn parse_factor(&mut self) -> Result<Node> {
        match self.next() {
            Some(Token::Quoted(phrase)) => Ok(Node::Exact(phrase.to_lowercase())),
            Some(Token::Word(word)) => {
                // Consecutive plain words join into a single term.
                let mut words = vec![word];
                while let Some(Token::Word(_)) = self.peek() {
                    if let Some(Token::Word(next)) = self.next() {
                        words.push(next);
                    }
                }
                Ok(Node::Term(words.join(" ").to_lowercase()))
            }
            Some(Token::LParen) => {
                let node = self.parse_expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(node),
                    _ => Err(UctiError::QueryParse("expected closing parenthesis".into())),
                }
            }
            other => Err(UctiError::QueryParse(format!(
                "expected a search term, found {other:?}"
            ))),
        }
    }
}

fn merge_and(left: Node, right: Node) -> Node {
    let mut children = match left {
        Node::And(children) => children,
        other => vec![other],
    };
    match right {
        Node::And(more) => children.extend(more),
        other => children.push(other),
    }
    Node::And(children)
}

fn merge_or(left: Node, right: Node) -> Node {
    let mut children = match left {
        Node::Or(children) => children,
        other => vec![other],
    };
    match right {
        Node::Or(more) => children.extend(more),
        other => children.push(other),
    }
    Node::Or(children)
}

/// Parse a command-free query into its AST.
pub fn parse_query(query: &str) -> Result<Node> {
    let tokens = tokenize(query)?;
    if tokens.is_empty() {
        return Err(UctiError::QueryParse("empty query".into()));
    }
    let mut parser = Parser {
        tokens,
        position: 0,
    };
    let node = parser.parse_expr()?;
    if parser.peek().is_some() {
        return Err(UctiError::QueryParse(format!(
            "unexpected trailing input at token {}",
            parser.position
        )));
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(t: &str) -> Node {
        Node::Term(t.into())
    }

    #[test]
    fn plain_words_join_into_one_lowercased_term() {
        assert_eq!(parse_query("FooServer RCE exploit").unwrap(), term("fooserver rce exploit"));
    }

    #[test]
    fn quoted_phrase_is_exact() {
        assert_eq!(
            parse_query("\"Foo Server\"").unwrap(),
            Node::Exact("foo server".into())
        );
    }

    #[test]
    fn adjacency_of_factors_is_and() {
        assert_eq!(
            parse_query("\"FooServer\" CVE-2025-1234").unwrap(),
            Node::And(vec![Node::Exact("fooserver".into()), term("cve-2025-1234")])
        );
    }

    #[test]
    fn explicit_and_or_build_the_obvious_tree() {
        assert_eq!(
            parse_query("foo AND bar").unwrap(),
            Node::And(vec![term("foo"), term("bar")])
        );
        assert_eq!(
            parse_query("foo OR bar").unwrap(),
            Node::Or(vec![term("foo"), term("bar")])
        );
    }

    #[test]
    fn nested_operators_flatten() {
        assert_eq!(
            parse_query("a AND b AND c").unwrap(),
            Node::And(vec![term("a"), term("b"), term("c")])
        );
        assert_eq!(
            parse_query("a OR b OR c").unwrap(),
            Node::Or(vec![term("a"), term("b"), term("c")])
        );
    }

    #[test]
    fn and_binds_tighter_than_or() {
        assert_eq!(
            parse_query("a AND b OR c").unwrap(),
            Node::Or(vec![Node::And(vec![term("a"), term("b")]), term("c")])
        );
    }

    #[test]
    fn parentheses_group_expressions() {
        assert_eq!(
            parse_query("(alpha OR beta) \"gamma delta\"").unwrap(),
            Node::And(vec![
                Node::Or(vec![term("alpha"), term("beta")]),
                Node::Exact("gamma delta".into()),
            ])
        );
    }

    #[test]
    fn words_after_or_merge_into_one_term() {
        // Consecutive words bind into a multi-word before adjacency applies.
        assert_eq!(
            parse_query("a OR b c").unwrap(),
            Node::Or(vec![term("a"), term("b c")])
        );
    }

    #[test]
    fn selector_tokens_stay_inside_terms() {
        assert_eq!(
            parse_query("user:alice leak").unwrap(),
            term("user:alice leak")
        );
    }

    #[test]
    fn malformed_queries_error() {
        assert!(parse_query("").is_err());
        assert!(parse_query("(foo").is_err());
        assert!(parse_query("\"unterminated").is_err());
        assert!(parse_query("AND foo").is_err());
        assert!(parse_query(")").is_err());
    }
}
