use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;

use crate::rpc::command::{parse_line, Command, ParseError, WireValue};
use crate::store::{ChangeContext, CfgError, ConfigStore, DiffRecord, GroupInfo, HelpInfo, Stage};

/// Result of one command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Reply {
    Done,
    Value(WireValue),
    Values(Vec<NamedValue>),
    Diff(Vec<DiffRecord>),
    Groups(Vec<GroupInfo>),
    Help(HelpInfo),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedValue {
    pub var: String,
    pub value: WireValue,
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Config(#[from] CfgError),
}

/// Executes operator commands through its own change context.
pub struct RpcDriver {
    ctx: ChangeContext,
    groups: Arc<RwLock<BTreeSet<String>>>,
}

impl RpcDriver {
    pub fn new(store: &ConfigStore) -> Self {
        let groups = Arc::new(RwLock::new(BTreeSet::new()));
        let known = groups.clone();
        let ctx = store.register_context(Some(Arc::new(move |group: &str| {
            known.write().insert(group.to_string());
        })));
        Self { ctx, groups }
    }

    pub fn context(&self) -> &ChangeContext {
        &self.ctx
    }

    /// Names of the groups announced to this driver so far.
    pub fn known_groups(&self) -> Vec<String> {
        self.groups.read().iter().cloned().collect()
    }

    fn require_live(&self) -> Result<(), CfgError> {
        match self.ctx.store().stage() {
            Stage::Live => Ok(()),
            Stage::Collecting => Err(CfgError::NotLive),
        }
    }

    pub fn execute(&self, command: Command) -> Result<Reply, CfgError> {
        let name = command.name();
        tracing::debug!(command = name, "Executing command");
        let ctx = &self.ctx;
        let reply = match command {
            Command::Set {
                group,
                instance,
                var,
                value,
            } => {
                ctx.set_now(&group, instance, &var, value.into_value()?)?;
                Reply::Done
            }
            Command::SetDelayed {
                group,
                instance,
                var,
                value,
            } => {
                ctx.set_delayed(&group, instance, &var, value.into_value()?)?;
                Reply::Done
            }
            Command::Del { group, instance, var } => {
                ctx.del_now(&group, instance, &var)?;
                Reply::Done
            }
            Command::DelDelayed { group, instance, var } => {
                ctx.del_delayed(&group, instance, &var)?;
                Reply::Done
            }
            Command::Get {
                group,
                instance,
                var: Some(var),
            } => Reply::Value(ctx.get(&group, instance, &var)?.into()),
            Command::Get {
                group,
                instance,
                var: None,
            } => Reply::Values(
                ctx.get_group(&group, instance)?
                    .into_iter()
                    .map(|(var, value)| NamedValue {
                        var,
                        value: value.into(),
                    })
                    .collect(),
            ),
            Command::Commit => {
                ctx.commit()?;
                Reply::Done
            }
            Command::Rollback => {
                ctx.rollback()?;
                Reply::Done
            }
            Command::AddGroupInstance { group, instance } => {
                self.require_live()?;
                ctx.add_group_instance(&group, instance)?;
                Reply::Done
            }
            Command::DelGroupInstance { group, instance } => {
                self.require_live()?;
                ctx.del_group_instance(&group, instance)?;
                Reply::Done
            }
            Command::Diff => Reply::Diff(ctx.diff()?.records()),
            Command::List { group: None } => Reply::Groups(ctx.groups()?),
            Command::List { group: Some(name) } => {
                let groups: Vec<GroupInfo> = ctx.groups()?.into_iter().filter(|g| g.name == name).collect();
                if groups.is_empty() {
                    return Err(CfgError::GroupNotFound(name));
                }
                Reply::Groups(groups)
            }
            Command::Help { group, var } => Reply::Help(ctx.help(&group, &var)?),
        };
        Ok(reply)
    }

    /// Parse and execute one line of the text interface.
    pub fn execute_line(&self, line: &str) -> Result<Reply, RpcError> {
        let command = parse_line(line)?;
        Ok(self.execute(command)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ShmPool, VarDef};

    fn driver() -> (ConfigStore, RpcDriver) {
        let store = ConfigStore::new(ShmPool::unbounded());
        store
            .declare_group(
                "core",
                vec![VarDef::int("debug", 1).range(0, 9), VarDef::str("name", "edge")],
                None,
            )
            .unwrap();
        let rpc = RpcDriver::new(&store);
        (store, rpc)
    }

    #[test]
    fn test_instance_commands_need_live_store() {
        let (store, rpc) = driver();
        assert!(matches!(
            rpc.execute_line("add_group_instance core 1"),
            Err(RpcError::Config(CfgError::NotLive))
        ));
        store.finalize().unwrap();
        assert_eq!(rpc.execute_line("add_group_instance core 1").unwrap(), Reply::Done);
    }

    #[test]
    fn test_get_whole_group() {
        let (store, rpc) = driver();
        store.finalize().unwrap();
        rpc.execute_line("set core debug 4").unwrap();
        let reply = rpc.execute_line("get core").unwrap();
        assert_eq!(
            reply,
            Reply::Values(vec![
                NamedValue {
                    var: "debug".into(),
                    value: WireValue::Int(4)
                },
                NamedValue {
                    var: "name".into(),
                    value: WireValue::Text("edge".into())
                },
            ])
        );
    }

    #[test]
    fn test_transaction_through_lines() {
        let (store, rpc) = driver();
        store.finalize().unwrap();
        rpc.execute_line("set_delayed core debug 7").unwrap();
        let Reply::Diff(records) = rpc.execute_line("diff").unwrap() else {
            panic!("expected a diff");
        };
        assert_eq!(records.len(), 1);
        rpc.execute_line("rollback").unwrap();
        assert_eq!(
            rpc.execute_line("get core debug").unwrap(),
            Reply::Value(WireValue::Int(1))
        );
        assert!(matches!(
            rpc.execute_line("set core debug 12"),
            Err(RpcError::Config(CfgError::OutOfRange { .. }))
        ));
    }

    #[test]
    fn test_announced_groups() {
        let (store, rpc) = driver();
        store.declare_single_str("script", "greeting", "hi", "").unwrap();
        assert_eq!(rpc.known_groups(), vec!["core".to_string()]);
        store.finalize().unwrap();
        assert_eq!(rpc.known_groups(), vec!["core".to_string(), "script".to_string()]);
        assert!(matches!(
            rpc.execute_line("list nothing"),
            Err(RpcError::Config(CfgError::GroupNotFound(_)))
        ));
    }
}
