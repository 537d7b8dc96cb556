//! Fan-out of an HA parent's configuration to its children.

use async_trait::async_trait;
use sonic_l2gw_common::{Job, JobResult};
use sonic_l2gw_types::{DeviceId, Plane};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::JobContext;
use crate::entities::{DeviceSnapshot, EntityKind};
use crate::error::Result;
use crate::ha::{
    EntityComparator, LogicalSwitchCommand, PhysicalLocatorCommand, RemoteMcastMacCommand,
    RemoteUcastMacCommand, Rescope, VlanBindingCommand,
};
use crate::store::MutationBatch;

/// Tables owned by the parent's configuration on global nodes.
fn global_tables() -> Vec<Arc<dyn EntityComparator>> {
    vec![
        Arc::new(LogicalSwitchCommand),
        Arc::new(PhysicalLocatorCommand),
        Arc::new(RemoteUcastMacCommand),
        Arc::new(RemoteMcastMacCommand),
    ]
}

/// Tables owned by the parent's configuration on physical switch nodes.
fn switch_tables() -> Vec<Arc<dyn EntityComparator>> {
    vec![Arc::new(VlanBindingCommand)]
}

/// Adds to `batch` the mutations that make `child` match `parent` on
/// `tables`, with the parent's rows rewritten into the child's scope.
fn plan_into(
    batch: &mut MutationBatch,
    tables: &[Arc<dyn EntityComparator>],
    parent: &DeviceSnapshot,
    child: &DeviceSnapshot,
) {
    let target = &child.device;
    for table in tables {
        let diff = table.compare(parent, child, Rescope::Left(target));
        for item in diff.missing {
            batch.put(target, Plane::Config, item);
        }
        for item in diff.extra {
            batch.delete(target, Plane::Config, item.kind(), item.key());
        }
    }
}

/// Logical switch puts go first and logical switch deletes go last, so no
/// row in the batch refers to a switch that is absent while it applies.
fn order(batch: MutationBatch) -> MutationBatch {
    use crate::store::Mutation;

    let (mut first, mut middle, mut last) = (Vec::new(), Vec::new(), Vec::new());
    for mutation in batch.mutations().iter().cloned() {
        match &mutation {
            Mutation::Put { item, .. } if item.kind() == EntityKind::LogicalSwitch => first.push(mutation),
            Mutation::Delete { kind: EntityKind::LogicalSwitch, .. } => last.push(mutation),
            _ => middle.push(mutation),
        }
    }
    let mut ordered = MutationBatch::new();
    for mutation in first.into_iter().chain(middle).chain(last) {
        ordered.push(mutation);
    }
    ordered
}

/// Copies the configuration of an HA parent onto every child.
///
/// Missing or different rows are written to the child's configuration plane
/// and rows the parent does not have are removed. One batch per child.
pub struct HaConfigSyncJob {
    ctx: JobContext,
    parent: DeviceId,
}

impl HaConfigSyncJob {
    pub fn new(ctx: JobContext, parent: &DeviceId) -> Self {
        Self {
            ctx,
            parent: parent.global_node(),
        }
    }

    pub fn key(&self) -> String {
        self.parent.to_string()
    }

    async fn plan_child(&self, parent: &DeviceSnapshot, child: &DeviceId) -> Result<MutationBatch> {
        let store = &self.ctx.store;
        let mut batch = MutationBatch::new();

        let child_config = store.read_snapshot(child, Plane::Config).await?;
        plan_into(&mut batch, &global_tables(), parent, &child_config);

        let switches = switch_tables();
        for name in parent.switches() {
            let parent_switch = store
                .read_snapshot(&self.parent.physical_switch(name), Plane::Config)
                .await?;
            let child_switch = store
                .read_snapshot(&child.physical_switch(name), Plane::Config)
                .await?;
            plan_into(&mut batch, &switches, &parent_switch, &child_switch);
        }
        Ok(order(batch))
    }
}

#[async_trait]
impl Job for HaConfigSyncJob {
    fn name(&self) -> String {
        format!("ha-config-sync {}", self.parent)
    }

    #[instrument(skip(self), fields(parent = %self.parent))]
    async fn run(&self) -> JobResult<()> {
        let children = self.ctx.topology.ha.children(&self.parent);
        if children.is_empty() {
            debug!("device is not an HA parent, nothing to sync");
            return Ok(());
        }

        let parent = self
            .ctx
            .store
            .read_snapshot(&self.parent, Plane::Config)
            .await?;
        for child in &children {
            let batch = self.plan_child(&parent, child).await?;
            if batch.is_empty() {
                debug!(%child, "child configuration in sync");
                continue;
            }
            info!(%child, mutations = batch.len(), "syncing child configuration");
            self.ctx.store.write_batch(batch).await?;
        }
        Ok(())
    }
}
