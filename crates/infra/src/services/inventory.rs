use chrono::Utc;

use supplyline_core::{AggregateId, ExpectedVersion, Versioned};
use supplyline_inventory::{
    CreateInventory, InventoryAlertPolicy, InventoryLevel, MoveStock, SetQuantity, SetThresholds,
};

use crate::repository::{EntityRepository, TransitionError, TransitionOutcome};
use crate::store::EntityStore;

/// Inventory operations on top of the shared repository.
#[derive(Debug)]
pub struct InventoryService<'r, S> {
    repository: &'r EntityRepository<S>,
    policy: InventoryAlertPolicy,
}

impl<'r, S: EntityStore> InventoryService<'r, S> {
    pub fn new(repository: &'r EntityRepository<S>) -> Self {
        Self::with_policy(repository, InventoryAlertPolicy::default())
    }

    pub fn with_policy(repository: &'r EntityRepository<S>, policy: InventoryAlertPolicy) -> Self {
        Self { repository, policy }
    }

    pub fn create(&self, cmd: CreateInventory) -> Result<TransitionOutcome<InventoryLevel>, TransitionError> {
        let change = InventoryLevel::create(&cmd)?;
        self.repository.create(&self.policy, change)
    }

    /// Set an absolute stock level.
    pub fn set_quantity(
        &self,
        id: AggregateId,
        expected: ExpectedVersion,
        quantity: i64,
        reason: Option<String>,
    ) -> Result<TransitionOutcome<InventoryLevel>, TransitionError> {
        self.repository
            .apply_transition(id, expected, &self.policy, |level: &InventoryLevel| {
                level.set_quantity(&SetQuantity {
                    quantity,
                    reason: reason.clone(),
                    occurred_at: Utc::now(),
                })
            })
    }

    pub fn receive(
        &self,
        id: AggregateId,
        expected: ExpectedVersion,
        quantity: i64,
        reference: Option<String>,
    ) -> Result<TransitionOutcome<InventoryLevel>, TransitionError> {
        self.repository
            .apply_transition(id, expected, &self.policy, |level: &InventoryLevel| {
                level.receive(&MoveStock {
                    quantity,
                    reference: reference.clone(),
                    occurred_at: Utc::now(),
                })
            })
    }

    pub fn ship(
        &self,
        id: AggregateId,
        expected: ExpectedVersion,
        quantity: i64,
        reference: Option<String>,
    ) -> Result<TransitionOutcome<InventoryLevel>, TransitionError> {
        self.repository
            .apply_transition(id, expected, &self.policy, |level: &InventoryLevel| {
                level.ship(&MoveStock {
                    quantity,
                    reference: reference.clone(),
                    occurred_at: Utc::now(),
                })
            })
    }

    pub fn set_thresholds(
        &self,
        id: AggregateId,
        expected: ExpectedVersion,
        min_quantity: i64,
        max_quantity: i64,
    ) -> Result<TransitionOutcome<InventoryLevel>, TransitionError> {
        self.repository
            .apply_transition(id, expected, &self.policy, |level: &InventoryLevel| {
                level.set_thresholds(&SetThresholds {
                    min_quantity,
                    max_quantity,
                    occurred_at: Utc::now(),
                })
            })
    }

    pub fn get(&self, id: AggregateId) -> Result<Option<Versioned<InventoryLevel>>, TransitionError> {
        self.repository.load(id)
    }
}
