//! Parser for the descriptor text dialect.
//!
//! Table descriptors (and a few other system payloads) are written in an
//! ad-hoc recursive syntax of quoted strings, decimal numbers and
//! curly-brace lists. The grammar lives in `descr.pest`; this module turns
//! the parse tree into [`Node`] values and renders them back.

use std::fmt;

use enum_as_inner::EnumAsInner;
use pest::Parser;

use crate::error::{Error, Result};

#[derive(Parser)]
#[grammar = "descr.pest"]
struct DescrParser;

#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum Node {
    Text(String),
    Number(i64),
    List(Vec<Node>),
}

impl Node {
    /// The list items, or an error naming what was expected.
    pub fn items(&self) -> Result<&[Node]> {
        self.as_list()
            .map(|v| v.as_slice())
            .ok_or_else(|| Error::corrupt_record("descriptor node is not a list"))
    }

    pub fn text(&self) -> Result<&str> {
        self.as_text()
            .map(|s| s.as_str())
            .ok_or_else(|| Error::corrupt_record("descriptor node is not a string"))
    }

    pub fn number(&self) -> Result<i64> {
        self.as_number()
            .copied()
            .ok_or_else(|| Error::corrupt_record("descriptor node is not a number"))
    }
}

pub fn parse(text: &str) -> Result<Node> {
    let mut document = DescrParser::parse(Rule::document, text).map_err(|e| {
        Error::corrupt_record("cannot parse descriptor text").with("cause", e.to_string())
    })?;
    let top = document
        .next()
        .expect("a successful parse has a document pair");
    let node = top
        .into_inner()
        .find(|p| p.as_rule() != Rule::EOI)
        .ok_or_else(|| Error::corrupt_record("empty descriptor document"))?;
    from_pair(node)
}

fn from_pair(pair: pest::iterators::Pair<Rule>) -> Result<Node> {
    Ok(match pair.as_rule() {
        Rule::list => Node::List(
            pair.into_inner()
                .map(from_pair)
                .collect::<Result<Vec<_>>>()?,
        ),
        Rule::string => {
            let raw = pair.as_str();
            // Strip the surrounding quotes, fold doubled inner quotes.
            Node::Text(raw[1..raw.len() - 1].replace("\"\"", "\""))
        }
        Rule::number => Node::Number(pair.as_str().parse().map_err(|_| {
            Error::corrupt_record("number in descriptor does not fit 64 bits")
                .with("value", pair.as_str())
        })?),
        other => unreachable!("unexpected rule {:?}", other),
    })
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Text(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
            Node::Number(n) => write!(f, "{}", n),
            Node::List(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "}}")
            }
        }
    }
}
