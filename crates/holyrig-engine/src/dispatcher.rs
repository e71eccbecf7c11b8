//! Request routing and parameter coercion.
//!
//! The dispatcher is the seam between the RPC surface and the rig
//! runtimes. It owns the rig registry, answers capability queries from the
//! compiled models, coerces loosely-typed JSON parameters into [`Value`]s
//! against the schema signature, and forwards commands to the right rig
//! task.
//!
//! A rig whose model failed to compile at startup still occupies a slot:
//! it shows up in `list_rigs` as disconnected and rejects everything else.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use holyrig_core::{Error, Result, Value};

use crate::rig::RigHandle;
use crate::subscription::{StatusSink, SubscriptionManager};

/// One registered rig: either a live runtime or a startup failure.
enum RigSlot {
    Active(RigHandle),
    Disabled { reason: String },
}

/// Capability listing for one rig, shaped for the wire.
#[derive(Debug, Serialize)]
pub struct Capabilities {
    pub commands: BTreeMap<String, CommandCapability>,
    pub status_fields: BTreeMap<String, &'static str>,
}

/// Parameter listing for one supported command.
#[derive(Debug, Serialize)]
pub struct CommandCapability {
    pub parameters: BTreeMap<String, &'static str>,
}

/// Routes operations to rig runtimes and the subscription manager.
pub struct Dispatcher {
    rigs: BTreeMap<String, RigSlot>,
    subscriptions: SubscriptionManager,
}

impl Dispatcher {
    /// Create an empty dispatcher over a subscription manager.
    pub fn new(subscriptions: SubscriptionManager) -> Self {
        Self {
            rigs: BTreeMap::new(),
            subscriptions,
        }
    }

    /// Register a live rig runtime.
    pub fn add_rig(&mut self, handle: RigHandle) {
        self.rigs
            .insert(handle.id().to_string(), RigSlot::Active(handle));
    }

    /// Register a rig whose configuration failed; it is listed but inert.
    pub fn add_disabled_rig(&mut self, id: impl Into<String>, reason: impl Into<String>) {
        let id = id.into();
        let reason = reason.into();
        warn!(rig = %id, %reason, "rig registered as disabled");
        self.rigs.insert(id, RigSlot::Disabled { reason });
    }

    /// The subscription manager this dispatcher feeds.
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    fn slot(&self, rig_id: &str) -> Result<&RigSlot> {
        self.rigs
            .get(rig_id)
            .ok_or_else(|| Error::UnknownRig(rig_id.to_string()))
    }

    fn active(&self, rig_id: &str) -> Result<&RigHandle> {
        match self.slot(rig_id)? {
            RigSlot::Active(handle) => Ok(handle),
            RigSlot::Disabled { reason } => Err(Error::Config(reason.clone())),
        }
    }

    /// Every configured rig id with its connected flag.
    pub fn list_rigs(&self) -> BTreeMap<String, bool> {
        self.rigs
            .iter()
            .map(|(id, slot)| {
                let connected = match slot {
                    RigSlot::Active(handle) => handle.state().is_connected(),
                    RigSlot::Disabled { .. } => false,
                };
                (id.clone(), connected)
            })
            .collect()
    }

    /// The model-supported subset of the schema, shaped for the wire.
    ///
    /// A command the model does not implement is absent, as is a status
    /// field no poll provides.
    pub fn capabilities(&self, rig_id: &str) -> Result<Capabilities> {
        let handle = self.active(rig_id)?;
        let model = handle.model();
        let schema = &model.schema;

        let commands = model
            .commands
            .keys()
            .filter_map(|name| {
                let signature = schema.commands.get(name)?;
                let parameters = signature
                    .iter()
                    .map(|(param, ty)| (param.clone(), ty.wire_type()))
                    .collect();
                Some((name.clone(), CommandCapability { parameters }))
            })
            .collect();

        let status_fields = model
            .status_fields()
            .into_iter()
            .filter_map(|field| {
                let ty = schema.status_field(field)?;
                Some((field.to_string(), ty.wire_type()))
            })
            .collect();

        Ok(Capabilities {
            commands,
            status_fields,
        })
    }

    /// Coerce parameters against the schema signature and run the command.
    pub async fn execute(
        &self,
        rig_id: &str,
        command: &str,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let handle = self.active(rig_id)?;
        let model = handle.model();

        if !model.commands.contains_key(command) {
            return Err(Error::UnsupportedCommand(command.to_string()));
        }
        let signature = model
            .schema
            .commands
            .get(command)
            .ok_or_else(|| Error::UnsupportedCommand(command.to_string()))?;

        let mut bindings = BTreeMap::new();
        for (name, ty) in signature {
            let raw = params.get(name).ok_or_else(|| {
                Error::InvalidParameter(format!("missing parameter: {name}"))
            })?;
            bindings.insert(name.clone(), ty.coerce(raw)?);
        }
        for name in params.keys() {
            if !signature.iter().any(|(declared, _)| declared == name) {
                return Err(Error::InvalidParameter(format!("unknown parameter: {name}")));
            }
        }

        handle.execute(command, bindings).await
    }

    /// Validate a subscription request and register it.
    pub fn subscribe(
        &self,
        rig_id: &str,
        fields: &[String],
        sink: Arc<dyn StatusSink>,
    ) -> Result<String> {
        let handle = self.active(rig_id)?;
        let model = handle.model();

        if fields.is_empty() {
            return Err(Error::Subscription("no status fields requested".into()));
        }
        let mut requested = BTreeSet::new();
        for field in fields {
            if model.schema.status_field(field).is_none() {
                return Err(Error::Subscription(format!(
                    "unknown status field: {field}"
                )));
            }
            if !model.status_fields().contains(&field.as_str()) {
                warn!(rig = %rig_id, %field, "subscribed field is not polled by this model");
            }
            requested.insert(field.clone());
        }

        Ok(self.subscriptions.subscribe(rig_id, requested, sink))
    }

    /// Remove a subscription. Returns `false` for unknown ids.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        self.subscriptions.unsubscribe(subscription_id)
    }
}
