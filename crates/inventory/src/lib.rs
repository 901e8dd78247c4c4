//! Inventory domain module.
//!
//! Business rules for stock levels, implemented purely as deterministic
//! domain logic (no IO, no storage). Mutations return a
//! [`supplyline_events::StateChange`] that the repository commits.

pub mod level;
pub mod policy;

pub use level::{
    CreateInventory, InventoryCreated, InventoryLevel, MoveStock, SetQuantity, SetThresholds,
    StockChanged, ThresholdsChanged,
};
pub use policy::{InventoryAlertPolicy, LOW_STOCK, OVERSTOCK};
