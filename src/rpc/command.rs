//! Operator commands and their text form.
//!
//! The JSON form is `{"cmd": "set", "group": "core", "var": "debug", "value": 3}`.
//! The line form mirrors the FIFO interface:
//!
//! ```text
//! set core.7 debug 3
//! set_delayed pool name "east"
//! del pool.7 name
//! get core [debug]
//! add_group_instance pool 7
//! commit | rollback | diff | list [group] | help core debug
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::codec::{self, ConversionError};
use crate::store::value::Value;

/// A value as it travels over an operator interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireValue {
    Int(i64),
    Text(String),
    Null,
}

impl WireValue {
    pub fn into_value(self) -> Result<Value, ConversionError> {
        match self {
            WireValue::Int(n) => i32::try_from(n)
                .map(Value::Int)
                .map_err(|_| ConversionError::Overflow(n.to_string())),
            WireValue::Text(s) => Ok(Value::String(Some(s))),
            WireValue::Null => Ok(Value::String(None)),
        }
    }
}

impl From<Value> for WireValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Int(v) => WireValue::Int(v.into()),
            Value::String(Some(s)) | Value::Str(s) => WireValue::Text(s),
            Value::String(None) => WireValue::Null,
            v @ Value::Pointer(_) => WireValue::Text(v.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Set {
        group: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instance: Option<u32>,
        var: String,
        value: WireValue,
    },
    SetDelayed {
        group: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instance: Option<u32>,
        var: String,
        value: WireValue,
    },
    Del {
        group: String,
        instance: u32,
        var: String,
    },
    DelDelayed {
        group: String,
        instance: u32,
        var: String,
    },
    Get {
        group: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instance: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        var: Option<String>,
    },
    Commit,
    Rollback,
    AddGroupInstance {
        group: String,
        instance: u32,
    },
    DelGroupInstance {
        group: String,
        instance: u32,
    },
    Diff,
    List {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group: Option<String>,
    },
    Help {
        group: String,
        var: String,
    },
}

impl Command {
    /// Name used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Set { .. } => "set",
            Command::SetDelayed { .. } => "set_delayed",
            Command::Del { .. } => "del",
            Command::DelDelayed { .. } => "del_delayed",
            Command::Get { .. } => "get",
            Command::Commit => "commit",
            Command::Rollback => "rollback",
            Command::AddGroupInstance { .. } => "add_group_instance",
            Command::DelGroupInstance { .. } => "del_group_instance",
            Command::Diff => "diff",
            Command::List { .. } => "list",
            Command::Help { .. } => "help",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("{cmd}: missing {arg}")]
    MissingArgument { cmd: &'static str, arg: &'static str },

    #[error("{cmd}: unexpected argument '{arg}'")]
    UnexpectedArgument { cmd: &'static str, arg: String },

    #[error("invalid group instance id: '{0}'")]
    BadInstance(String),

    #[error("unterminated quoted value")]
    UnterminatedQuote,
}

struct Args<'a> {
    cmd: &'static str,
    rest: &'a str,
}

impl<'a> Args<'a> {
    fn next(&mut self) -> Option<&'a str> {
        let rest = self.rest.trim_start();
        if rest.is_empty() {
            return None;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let (word, tail) = rest.split_at(end);
        self.rest = tail;
        Some(word)
    }

    fn require(&mut self, arg: &'static str) -> Result<&'a str, ParseError> {
        self.next()
            .ok_or(ParseError::MissingArgument { cmd: self.cmd, arg })
    }

    /// Everything left on the line, as a value.
    fn value(&mut self) -> Result<WireValue, ParseError> {
        let text = self.rest.trim();
        self.rest = "";
        if text.is_empty() {
            return Err(ParseError::MissingArgument {
                cmd: self.cmd,
                arg: "value",
            });
        }
        if let Some(quoted) = text.strip_prefix('"') {
            return quoted
                .strip_suffix('"')
                .map(|s| WireValue::Text(s.to_string()))
                .ok_or(ParseError::UnterminatedQuote);
        }
        Ok(match codec::parse_int(text) {
            Ok(n) => WireValue::Int(n.into()),
            Err(_) => WireValue::Text(text.to_string()),
        })
    }

    fn finish(mut self) -> Result<(), ParseError> {
        match self.next() {
            Some(extra) => Err(ParseError::UnexpectedArgument {
                cmd: self.cmd,
                arg: extra.to_string(),
            }),
            None => Ok(()),
        }
    }
}

fn parse_id(text: &str) -> Result<u32, ParseError> {
    text.parse()
        .map_err(|_| ParseError::BadInstance(text.to_string()))
}

/// Split `group[.id]`.
fn parse_address(text: &str) -> Result<(String, Option<u32>), ParseError> {
    match text.split_once('.') {
        Some((group, id)) => Ok((group.to_string(), Some(parse_id(id)?))),
        None => Ok((text.to_string(), None)),
    }
}

/// Parse one line of the text interface.
pub fn parse_line(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest),
        None => (line, ""),
    };
    let cmd: &'static str = match word {
        "" => return Err(ParseError::Empty),
        "set" => "set",
        "set_delayed" => "set_delayed",
        "del" => "del",
        "del_delayed" => "del_delayed",
        "get" => "get",
        "commit" => "commit",
        "rollback" => "rollback",
        "add_group_instance" => "add_group_instance",
        "del_group_instance" => "del_group_instance",
        "diff" => "diff",
        "list" => "list",
        "help" => "help",
        other => return Err(ParseError::UnknownCommand(other.to_string())),
    };
    let mut args = Args { cmd, rest };

    let command = match cmd {
        "set" | "set_delayed" => {
            let (group, instance) = parse_address(args.require("group")?)?;
            let var = args.require("variable")?.to_string();
            let value = args.value()?;
            if cmd == "set" {
                Command::Set { group, instance, var, value }
            } else {
                Command::SetDelayed { group, instance, var, value }
            }
        }
        "del" | "del_delayed" => {
            let (group, instance) = parse_address(args.require("group")?)?;
            let instance = instance.ok_or(ParseError::MissingArgument {
                cmd,
                arg: "group instance id",
            })?;
            let var = args.require("variable")?.to_string();
            if cmd == "del" {
                Command::Del { group, instance, var }
            } else {
                Command::DelDelayed { group, instance, var }
            }
        }
        "get" => {
            let (group, instance) = parse_address(args.require("group")?)?;
            let var = args.next().map(str::to_string);
            Command::Get { group, instance, var }
        }
        "add_group_instance" | "del_group_instance" => {
            let group = args.require("group")?.to_string();
            let instance = parse_id(args.require("group instance id")?)?;
            if cmd == "add_group_instance" {
                Command::AddGroupInstance { group, instance }
            } else {
                Command::DelGroupInstance { group, instance }
            }
        }
        "list" => Command::List {
            group: args.next().map(str::to_string),
        },
        "help" => Command::Help {
            group: args.require("group")?.to_string(),
            var: args.require("variable")?.to_string(),
        },
        "commit" => Command::Commit,
        "rollback" => Command::Rollback,
        _ => Command::Diff,
    };
    args.finish()?;
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set_with_instance() {
        assert_eq!(
            parse_line("set core.7 debug 3").unwrap(),
            Command::Set {
                group: "core".into(),
                instance: Some(7),
                var: "debug".into(),
                value: WireValue::Int(3),
            }
        );
        assert_eq!(
            parse_line("set_delayed pool name \"42\"").unwrap(),
            Command::SetDelayed {
                group: "pool".into(),
                instance: None,
                var: "name".into(),
                value: WireValue::Text("42".into()),
            }
        );
        assert_eq!(
            parse_line("set pool name east side").unwrap(),
            Command::Set {
                group: "pool".into(),
                instance: None,
                var: "name".into(),
                value: WireValue::Text("east side".into()),
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_line("   "), Err(ParseError::Empty));
        assert_eq!(parse_line("reload"), Err(ParseError::UnknownCommand("reload".into())));
        assert_eq!(
            parse_line("del pool name"),
            Err(ParseError::MissingArgument {
                cmd: "del",
                arg: "group instance id"
            })
        );
        assert_eq!(parse_line("get pool.x"), Err(ParseError::BadInstance("x".into())));
        assert_eq!(
            parse_line("commit now"),
            Err(ParseError::UnexpectedArgument {
                cmd: "commit",
                arg: "now".into()
            })
        );
        assert_eq!(parse_line("set a b \"open"), Err(ParseError::UnterminatedQuote));
    }

    #[test]
    fn test_json_form() {
        let cmd: Command =
            serde_json::from_str(r#"{"cmd":"get","group":"core","var":"debug"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Get {
                group: "core".into(),
                instance: None,
                var: Some("debug".into())
            }
        );
        let cmd: Command = serde_json::from_str(r#"{"cmd":"commit"}"#).unwrap();
        assert_eq!(cmd, Command::Commit);
        let cmd: Command =
            serde_json::from_str(r#"{"cmd":"set","group":"pool","var":"name","value":null}"#).unwrap();
        assert_eq!(cmd.name(), "set");
    }

    #[test]
    fn test_wire_value_range() {
        assert_eq!(WireValue::Int(5).into_value(), Ok(Value::Int(5)));
        assert!(WireValue::Int(i64::from(i32::MAX) + 1).into_value().is_err());
        assert_eq!(WireValue::Null.into_value(), Ok(Value::String(None)));
    }
}
