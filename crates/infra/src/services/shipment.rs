use chrono::Utc;

use supplyline_core::{AggregateId, ExpectedVersion, Versioned};
use supplyline_shipment::{
    CreateShipment, Shipment, ShipmentAlertPolicy, ShipmentStatus, UpdateLocation, UpdateStatus,
};

use crate::repository::{EntityRepository, TransitionError, TransitionOutcome};
use crate::store::EntityStore;

/// Shipment tracking on top of the shared repository.
#[derive(Debug)]
pub struct ShipmentService<'r, S> {
    repository: &'r EntityRepository<S>,
    policy: ShipmentAlertPolicy,
}

impl<'r, S: EntityStore> ShipmentService<'r, S> {
    pub fn new(repository: &'r EntityRepository<S>) -> Self {
        Self::with_policy(repository, ShipmentAlertPolicy::default())
    }

    pub fn with_policy(repository: &'r EntityRepository<S>, policy: ShipmentAlertPolicy) -> Self {
        Self { repository, policy }
    }

    pub fn create(&self, cmd: CreateShipment) -> Result<TransitionOutcome<Shipment>, TransitionError> {
        let change = Shipment::create(&cmd)?;
        self.repository.create(&self.policy, change)
    }

    pub fn update_status(
        &self,
        id: AggregateId,
        expected: ExpectedVersion,
        status: ShipmentStatus,
        location: Option<String>,
    ) -> Result<TransitionOutcome<Shipment>, TransitionError> {
        self.repository
            .apply_transition(id, expected, &self.policy, |shipment: &Shipment| {
                shipment.update_status(&UpdateStatus {
                    status,
                    location: location.clone(),
                    occurred_at: Utc::now(),
                })
            })
    }

    pub fn update_location(
        &self,
        id: AggregateId,
        expected: ExpectedVersion,
        location: impl Into<String>,
    ) -> Result<TransitionOutcome<Shipment>, TransitionError> {
        let location = location.into();
        self.repository
            .apply_transition(id, expected, &self.policy, |shipment: &Shipment| {
                shipment.update_location(&UpdateLocation {
                    location: location.clone(),
                    occurred_at: Utc::now(),
                })
            })
    }

    pub fn get(&self, id: AggregateId) -> Result<Option<Versioned<Shipment>>, TransitionError> {
        self.repository.load(id)
    }
}
