//! Parser for `Root.Subcommand key1 val1 key2 val2` command lines.

use crate::{ServiceError, ServiceResult};
use std::collections::BTreeMap;
use std::fmt;

/// A parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub root: String,
    pub subcommand: String,
    pub args: BTreeMap<String, String>,
}

impl Command {
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).map(String::as_str)
    }

    /// Like [`Command::arg`] but fails when the argument is absent.
    pub fn required(&self, name: &str) -> ServiceResult<&str> {
        self.arg(name).ok_or_else(|| ServiceError::MissingArgument {
            name: name.to_string(),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.root, self.subcommand)?;
        for (key, value) in &self.args {
            write!(f, " {} {}", key, value)?;
        }
        Ok(())
    }
}

/// Parses one command line.
///
/// The root keeps its spelling, the subcommand is lower-cased. Arguments come
/// in key/value pairs; a repeated key keeps its last value.
pub fn parse(input: &str) -> ServiceResult<Command> {
    let mut tokens = input.split_whitespace();

    let head = tokens
        .next()
        .ok_or_else(|| ServiceError::parse(input, "empty command"))?;
    let (root, subcommand) = head
        .split_once('.')
        .ok_or_else(|| ServiceError::parse(input, "expected Root.Subcommand"))?;
    if root.is_empty() || subcommand.is_empty() {
        return Err(ServiceError::parse(input, "expected Root.Subcommand"));
    }

    let rest: Vec<&str> = tokens.collect();
    if rest.len() % 2 != 0 {
        return Err(ServiceError::parse(
            input,
            format!("argument {:?} has no value", rest[rest.len() - 1]),
        ));
    }

    let args = rest
        .chunks(2)
        .map(|pair| (pair[0].to_string(), pair[1].to_string()))
        .collect();

    Ok(Command {
        root: root.to_string(),
        subcommand: subcommand.to_ascii_lowercase(),
        args,
    })
}
