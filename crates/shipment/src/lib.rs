//! Shipment domain module.
//!
//! Status state machine and alert rules for shipments. Pure domain logic:
//! mutations return a [`supplyline_events::StateChange`] for the repository
//! to commit.

pub mod policy;
pub mod shipment;

pub use policy::{CANCELLED, DELAY, LATE_DELIVERY, ShipmentAlertPolicy, ShipmentAlertRule};
pub use shipment::{
    CreateShipment, Shipment, ShipmentCreated, ShipmentStatus, ShipmentStatusUpdated,
    UpdateLocation, UpdateStatus,
};
