//! In-memory [`DataBackend`] that records every interaction
//!
//! Mutations append audit rows the way the database trigger does: inside a
//! transaction they are staged and only become visible on commit, and the
//! actor is whatever the transaction's session variable holds.

use async_trait::async_trait;
use serde_json::{json, Map, Value as JsonValue};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Mutex,
    },
};

use super::{
    backend::DataBackend,
    call::{DataCall, OperationKind},
    error::{DataError, DataResult},
    row_key::canonical_row_id,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Execute(OperationKind),
    Begin,
    SetVariable { name: String, value: String },
    ExecuteIn(OperationKind),
    Commit,
    Rollback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAudit {
    pub entity: String,
    pub row_id: String,
    pub operation: &'static str,
    pub previous_values: Option<JsonValue>,
    pub new_values: Option<JsonValue>,
    pub actor: Option<String>,
}

#[derive(Debug, Default)]
pub struct MockTransaction {
    variables: HashMap<String, String>,
    pending: Vec<RecordedAudit>,
}

#[derive(Debug, Default)]
pub struct RecordingBackend {
    events: Mutex<Vec<Event>>,
    audit: Mutex<Vec<RecordedAudit>>,
    next_id: AtomicI64,
    fail_set_variable: AtomicBool,
    fail_execute: AtomicBool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_set_variable(self) -> Self {
        self.fail_set_variable.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_execute(self) -> Self {
        self.fail_execute.store(true, Ordering::SeqCst);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn audit_rows(&self) -> Vec<RecordedAudit> {
        self.audit.lock().unwrap().clone()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    /// Run the call and return its result plus the audit rows a trigger would write
    fn simulate(&self, call: &DataCall, actor: Option<&String>) -> (JsonValue, Vec<RecordedAudit>) {
        let args = &call.arguments;
        let operation = match call.operation {
            OperationKind::Create | OperationKind::CreateMany | OperationKind::Upsert => "CREATE",
            OperationKind::Update | OperationKind::UpdateMany => "UPDATE",
            OperationKind::Delete | OperationKind::DeleteMany => "DELETE",
            OperationKind::FindMany => return (json!([]), Vec::new()),
            OperationKind::Count => return (json!({ "count": 0 }), Vec::new()),
            OperationKind::FindUnique | OperationKind::FindFirst => {
                return (JsonValue::Null, Vec::new())
            },
        };

        let data = match args.data {
            JsonValue::Object(ref map) => map.clone(),
            _ => Map::new(),
        };

        let mut before = args.filter.clone();
        if !before.contains_key("id") && operation == "CREATE" {
            before.insert("id".into(), json!(self.next_id.fetch_add(1, Ordering::SeqCst) + 1));
        }
        let mut after = before.clone();
        after.extend(data);

        let entry = RecordedAudit {
            entity: call.entity.clone(),
            row_id: canonical_row_id(&after, &["id"]),
            operation,
            previous_values: (operation != "CREATE").then(|| JsonValue::Object(before)),
            new_values: (operation != "DELETE").then(|| JsonValue::Object(after.clone())),
            actor: actor.cloned(),
        };

        (JsonValue::Object(after), vec![entry])
    }
}

#[async_trait]
impl DataBackend for RecordingBackend {
    type Transaction = MockTransaction;

    async fn execute(&self, call: &DataCall) -> DataResult<JsonValue> {
        self.record(Event::Execute(call.operation));
        tokio::task::yield_now().await;

        let (result, rows) = self.simulate(call, None);
        self.audit.lock().unwrap().extend(rows);
        Ok(result)
    }

    async fn begin(&self) -> DataResult<Self::Transaction> {
        self.record(Event::Begin);
        tokio::task::yield_now().await;
        Ok(MockTransaction::default())
    }

    async fn set_transaction_variable(
        &self,
        tx: &mut Self::Transaction,
        name: &str,
        value: &str,
    ) -> DataResult<()> {
        self.record(Event::SetVariable {
            name: name.to_string(),
            value: value.to_string(),
        });
        tokio::task::yield_now().await;

        if self.fail_set_variable.load(Ordering::SeqCst) {
            return Err(DataError::Backend(format!("unrecognized configuration parameter \"{name}\"")));
        }
        tx.variables.insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn execute_in(&self, tx: &mut Self::Transaction, call: &DataCall) -> DataResult<JsonValue> {
        self.record(Event::ExecuteIn(call.operation));
        tokio::task::yield_now().await;

        let actor = tx.variables.get(super::intercept::DEFAULT_SESSION_VARIABLE);
        let (result, rows) = self.simulate(call, actor);
        // The trigger has already fired when a later statement error surfaces.
        tx.pending.extend(rows);

        if self.fail_execute.load(Ordering::SeqCst) {
            return Err(DataError::Backend("simulated constraint violation".into()));
        }
        Ok(result)
    }

    async fn commit(&self, tx: Self::Transaction) -> DataResult<()> {
        self.record(Event::Commit);
        self.audit.lock().unwrap().extend(tx.pending);
        Ok(())
    }

    async fn rollback(&self, _tx: Self::Transaction) -> DataResult<()> {
        self.record(Event::Rollback);
        Ok(())
    }
}
