//! Armada fleet reconciliation
//!
//! Diffs the declared topology (named server groups × replica counts)
//! against live provider state and converges the two: creates missing
//! servers, drains and deletes extraneous ones, and produces the
//! canonical [`ServerSet`] every downstream component consumes.
//!
//! The server name `<prefix>-<group>-<index>` is the only join key
//! between desired and observed state. There is no persisted mapping;
//! all current state is re-derived from the provider on every run.

pub mod cloud_init;
pub mod error;
pub mod factory;
pub mod key;
pub mod reconciler;
pub mod set;

pub use error::{ReconcileError, Result};
pub use factory::provider_for;
pub use key::ServerKey;
pub use reconciler::{DrainOutcome, NoopDrainer, NodeDrainer, Reconciler};
pub use set::{ServerSet, ServerSetEntry};
