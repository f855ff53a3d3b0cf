//! Minimal triple-pattern language understood by the store's query and
//! update entry points.
//!
//! Query: `?s <predicate> <object-uri>` or `?s <predicate> "literal"`.
//! Update: `SET <subject> <predicate> <object>`, `ADD <subject> <predicate> <object>`,
//! `UNSET <subject> <predicate>`.

use crate::error::AssetError;
use crate::model::{Record, ResourceId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pub predicate: String,
    pub object: String,
}

impl Pattern {
    pub fn matches(&self, record: &Record) -> bool {
        record.has(&self.predicate, &self.object)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Set {
        subject: ResourceId,
        predicate: String,
        object: String,
    },
    Add {
        subject: ResourceId,
        predicate: String,
        object: String,
    },
    Unset {
        subject: ResourceId,
        predicate: String,
    },
}

impl Statement {
    pub fn subject(&self) -> &ResourceId {
        match self {
            Statement::Set { subject, .. }
            | Statement::Add { subject, .. }
            | Statement::Unset { subject, .. } => subject,
        }
    }

    /// Apply to a record; returns whether anything changed.
    pub fn apply(&self, record: &mut Record) -> bool {
        match self {
            Statement::Set {
                predicate, object, ..
            } => {
                let changed = record.values(predicate) != std::slice::from_ref(object);
                record.set(predicate.clone(), object.clone());
                changed
            }
            Statement::Add {
                predicate, object, ..
            } => {
                if record.has(predicate, object) {
                    return false;
                }
                record.add(predicate.clone(), object.clone());
                true
            }
            Statement::Unset { predicate, .. } => record.unset(predicate),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Var(String),
    Uri(String),
    Literal(String),
    Word(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, AssetError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        match c {
            '<' => {
                chars.next();
                let uri: String = chars.by_ref().take_while(|&c| c != '>').collect();
                if uri.is_empty() {
                    return Err(syntax(input, "empty <...> term"));
                }
                tokens.push(Token::Uri(uri));
            }
            '"' => {
                chars.next();
                let mut literal = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                literal.push(escaped);
                            }
                        }
                        '"' => {
                            closed = true;
                            break;
                        }
                        other => literal.push(other),
                    }
                }
                if !closed {
                    return Err(syntax(input, "unterminated literal"));
                }
                tokens.push(Token::Literal(literal));
            }
            '?' => {
                chars.next();
                let name: String = std::iter::from_fn(|| chars.next_if(|c| !c.is_whitespace()))
                    .collect();
                tokens.push(Token::Var(name));
            }
            _ => {
                let word: String = std::iter::from_fn(|| chars.next_if(|c| !c.is_whitespace()))
                    .collect();
                tokens.push(Token::Word(word));
            }
        }
    }
    Ok(tokens)
}

fn object_term(token: &Token) -> Option<String> {
    match token {
        Token::Uri(v) | Token::Literal(v) => Some(v.clone()),
        _ => None,
    }
}

fn syntax(input: &str, reason: &str) -> AssetError {
    AssetError::Validation(format!("invalid store query '{input}': {reason}"))
}

pub fn parse_pattern(input: &str) -> Result<Pattern, AssetError> {
    let tokens = tokenize(input)?;
    match tokens.as_slice() {
        [Token::Var(_), Token::Uri(predicate), object] => {
            let object = object_term(object).ok_or_else(|| syntax(input, "bad object term"))?;
            Ok(Pattern {
                predicate: predicate.clone(),
                object,
            })
        }
        _ => Err(syntax(input, "expected `?var <predicate> <object>`")),
    }
}

pub fn parse_statement(input: &str) -> Result<Statement, AssetError> {
    let tokens = tokenize(input)?;
    match tokens.as_slice() {
        [Token::Word(verb), Token::Uri(subject), Token::Uri(predicate), object]
            if verb.eq_ignore_ascii_case("set") || verb.eq_ignore_ascii_case("add") =>
        {
            let object = object_term(object).ok_or_else(|| syntax(input, "bad object term"))?;
            let subject = ResourceId::new(subject.clone());
            let predicate = predicate.clone();
            if verb.eq_ignore_ascii_case("set") {
                Ok(Statement::Set {
                    subject,
                    predicate,
                    object,
                })
            } else {
                Ok(Statement::Add {
                    subject,
                    predicate,
                    object,
                })
            }
        }
        [Token::Word(verb), Token::Uri(subject), Token::Uri(predicate)]
            if verb.eq_ignore_ascii_case("unset") =>
        {
            Ok(Statement::Unset {
                subject: ResourceId::new(subject.clone()),
                predicate: predicate.clone(),
            })
        }
        _ => Err(syntax(input, "expected SET/ADD/UNSET statement")),
    }
}
