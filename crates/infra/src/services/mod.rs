//! Domain services: each binds one aggregate's mutations and alert policy to
//! the generic [`EntityRepository`](crate::repository::EntityRepository).

pub mod inventory;
pub mod shipment;

pub use inventory::InventoryService;
pub use shipment::ShipmentService;
