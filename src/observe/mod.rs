//! Change observation
//!
//! Committed `Changes` batches flow from processors to an `ObservationBus`,
//! which fans them out to registered observers. `NetChangeObserver` reduces
//! each batch to one `NetChange` per changed node and `ChangeHistory` keeps
//! recent batches for timeline queries.

pub mod bus;
pub mod changes;
pub mod net_change;

pub use bus::ObservationBus;
pub use changes::{ChangeHistory, ChangeTimeline, Changes};
pub use net_change::{
    compute_net_changes, ChangeEvent, ChangeEvents, NetChange, NetChangeListener,
    NetChangeObserver,
};

/// Receiver of committed change batches
pub trait Observer: Send + Sync {
    fn notify(&self, changes: &Changes);
}
