//! Selector parser
//!
//! Parses selector strings into a structured [`Selector`] AST.
//!
//! ```text
//! selector := chain (',' chain)*
//! chain    := atom (':' atom)*
//! atom     := '@' ident | '#' ident | '!' ('enter' | 'exit')
//! ```

use std::fmt;
use std::str::FromStr;

/// A parsed selector.
///
/// Leaf variants carry an optional refinement link: `A:B` parses as `A`
/// with `next = B`, and matches only entities that satisfy both. A
/// [`Selector::Union`] only ever appears at the top level and holds two or
/// more chains in source order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// `@name` - matches the entity whose id is `name`
    Id {
        name: String,
        next: Option<Box<Selector>>,
    },
    /// `#name` - matches entities carrying tag `name`
    Tag {
        name: String,
        next: Option<Box<Selector>>,
    },
    /// `!enter` / `!exit` - matches entities that received a collision event this step
    Event {
        kind: EventKind,
        next: Option<Box<Selector>>,
    },
    /// `a, b, c` - matches entities matching any chain
    Union(Vec<Selector>),
}

impl Selector {
    /// Create an id selector with no refinement.
    #[must_use]
    pub fn id(name: impl Into<String>) -> Self {
        Self::Id {
            name: name.into(),
            next: None,
        }
    }

    /// Create a tag selector with no refinement.
    #[must_use]
    pub fn tag(name: impl Into<String>) -> Self {
        Self::Tag {
            name: name.into(),
            next: None,
        }
    }

    /// Create an event selector with no refinement.
    #[must_use]
    pub const fn event(kind: EventKind) -> Self {
        Self::Event { kind, next: None }
    }

    /// Attach `next` as the refinement of this leaf.
    ///
    /// Unions are returned unchanged; they never carry a refinement.
    #[must_use]
    pub fn refined_by(self, next: Self) -> Self {
        let next = Some(Box::new(next));
        match self {
            Self::Id { name, .. } => Self::Id { name, next },
            Self::Tag { name, .. } => Self::Tag { name, next },
            Self::Event { kind, .. } => Self::Event { kind, next },
            Self::Union(chains) => Self::Union(chains),
        }
    }

    /// The refinement link of a leaf, if any.
    #[must_use]
    pub fn next(&self) -> Option<&Self> {
        match self {
            Self::Id { next, .. } | Self::Tag { next, .. } | Self::Event { next, .. } => {
                next.as_deref()
            }
            Self::Union(_) => None,
        }
    }

    /// Iterate the chains of this selector: the union members, or the
    /// selector itself when it is a single chain.
    pub fn chains(&self) -> impl Iterator<Item = &Self> {
        let slice = match self {
            Self::Union(chains) => chains.as_slice(),
            other => std::slice::from_ref(other),
        };
        slice.iter()
    }

    /// Iterate the links of a chain, head first.
    pub fn links(&self) -> Links<'_> {
        Links {
            current: match self {
                Self::Union(_) => None,
                leaf => Some(leaf),
            },
        }
    }

    /// Whether any link anywhere in this selector is an event selector.
    #[must_use]
    pub fn uses_events(&self) -> bool {
        self.chains()
            .flat_map(Self::links)
            .any(|link| matches!(link, Self::Event { .. }))
    }
}

/// Iterator over the links of a refinement chain.
#[derive(Debug, Clone)]
pub struct Links<'a> {
    current: Option<&'a Selector>,
}

impl<'a> Iterator for Links<'a> {
    type Item = &'a Selector;

    fn next(&mut self) -> Option<Self::Item> {
        let link = self.current?;
        self.current = link.next();
        Some(link)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Union(chains) => {
                for (i, chain) in chains.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{chain}")?;
                }
                Ok(())
            }
            leaf => {
                let mut first = true;
                for link in leaf.links() {
                    if !first {
                        write!(f, ":")?;
                    }
                    first = false;

                    match link {
                        Self::Id { name, .. } => write!(f, "@{name}")?,
                        Self::Tag { name, .. } => write!(f, "#{name}")?,
                        Self::Event { kind, .. } => write!(f, "!{kind}")?,
                        Self::Union(_) => {}
                    }
                }
                Ok(())
            }
        }
    }
}

impl FromStr for Selector {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_selector(s)
    }
}

/// Collision event kinds an event selector can match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Enter,
    Exit,
}

impl EventKind {
    /// Both kinds, in declaration order.
    pub const ALL: [Self; 2] = [Self::Enter, Self::Exit];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Exit => "exit",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enter" => Ok(Self::Enter),
            "exit" => Ok(Self::Exit),
            other => Err(ParseError {
                message: format!("unknown event '{other}', expected 'enter' or 'exit'"),
                position: 0,
            }),
        }
    }
}

/// Parse error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parse error at position {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for ParseError {}

/// Parse a selector string into a [`Selector`] AST.
///
/// # Syntax
///
/// - `@name` - entity with id `name`
/// - `#name` - entity tagged `name`
/// - `!enter` / `!exit` - entity with a collision event this step
/// - `A:B` - refinement, matches A AND B (binds tighter than `,`)
/// - `A, B` - union, matches A OR B
///
/// # Errors
///
/// Returns `ParseError` if the selector string is empty or malformed.
pub fn parse_selector(input: &str) -> Result<Selector, ParseError> {
    let mut parser = Parser::new(input);
    parser.parse()
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse(&mut self) -> Result<Selector, ParseError> {
        self.skip_whitespace();

        if self.is_eof() {
            return Err(self.error("empty selector"));
        }

        let mut chains = vec![self.parse_chain()?];

        loop {
            self.skip_whitespace();
            if self.is_eof() {
                break;
            }

            if self.peek() != Some(',') {
                return Err(self.error("expected ',' or ':'"));
            }
            self.advance();
            self.skip_whitespace();
            chains.push(self.parse_chain()?);
        }

        if chains.len() == 1 {
            Ok(chains.remove(0))
        } else {
            Ok(Selector::Union(chains))
        }
    }

    fn parse_chain(&mut self) -> Result<Selector, ParseError> {
        let mut links = vec![self.parse_atom()?];

        loop {
            self.skip_whitespace();
            if self.peek() != Some(':') {
                break;
            }
            self.advance();
            self.skip_whitespace();
            links.push(self.parse_atom()?);
        }

        // Right-nest: A:B:C -> A(next = B(next = C))
        let mut chain = links.pop().ok_or_else(|| self.error("expected selector"))?;
        while let Some(link) = links.pop() {
            chain = link.refined_by(chain);
        }
        Ok(chain)
    }

    fn parse_atom(&mut self) -> Result<Selector, ParseError> {
        match self.peek() {
            Some('@') => {
                self.advance();
                let name = self.parse_identifier('@')?;
                Ok(Selector::id(name))
            }
            Some('#') => {
                self.advance();
                let name = self.parse_identifier('#')?;
                Ok(Selector::tag(name))
            }
            Some('!') => {
                self.advance();
                let start = self.pos;
                let name = self.parse_identifier('!')?;
                name.parse::<EventKind>()
                    .map(Selector::event)
                    .map_err(|e| ParseError {
                        message: e.message,
                        position: start,
                    })
            }
            Some(c) => Err(self.error(&format!(
                "unexpected '{c}', expected '@', '#' or '!'"
            ))),
            None => Err(self.error("expected selector")),
        }
    }

    fn parse_identifier(&mut self, sigil: char) -> Result<String, ParseError> {
        let mut ident = String::new();

        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }

        if ident.is_empty() {
            return Err(self.error(&format!("expected identifier after '{sigil}'")));
        }

        Ok(ident)
    }

    fn error(&self, message: &str) -> ParseError {
        ParseError {
            message: message.to_string(),
            position: self.pos,
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn remaining(&self) -> &str {
        self.input.get(self.pos..).unwrap_or("")
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_links_iterate_head_first() {
        let selector = parse_selector("!enter:#enemies:#boss").unwrap();
        let links: Vec<String> = selector.links().map(ToString::to_string).collect();
        assert_eq!(links, ["!enter:#enemies:#boss", "#enemies:#boss", "#boss"]);
    }

    #[test]
    fn test_chains_of_single_chain() {
        let selector = parse_selector("#a:#b").unwrap();
        assert_eq!(selector.chains().count(), 1);
    }

    #[test]
    fn test_uses_events() {
        assert!(parse_selector("@a, #b:!exit").unwrap().uses_events());
        assert!(!parse_selector("@a, #b").unwrap().uses_events());
    }

    #[test]
    fn test_error_position() {
        let err = parse_selector("@a, #").unwrap_err();
        assert_eq!(err.position, 5);
        assert!(err.message.contains("identifier"));
    }

    #[test]
    fn test_unknown_event_position_points_at_name() {
        let err = parse_selector("!unknown").unwrap_err();
        assert_eq!(err.position, 1);
    }

    #[test]
    fn test_identifier_allows_dash_and_underscore() {
        let selector = parse_selector("@main-menu_2").unwrap();
        assert_eq!(selector, Selector::id("main-menu_2"));
    }
}
