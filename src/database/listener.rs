//! Typed observer interfaces for value and child events.
//!
//! A listener is registered through `add_value_event_listener` or
//! `add_child_event_listener` and stays attached until its
//! [`ListenerRegistration`](crate::database::ListenerRegistration) is detached
//! or dropped, or until the database cancels it.

use crate::database::api::DataSnapshot;
use crate::database::error::DatabaseError;

/// Receives the full value at a location whenever it changes.
pub trait ValueEventListener: Send + Sync + 'static {
    fn on_data_change(&self, snapshot: DataSnapshot);

    /// Called once when the database revokes the listener, e.g. because the
    /// location can no longer be read. No events follow.
    fn on_cancelled(&self, _error: DatabaseError) {}
}

/// Receives per-child notifications for the children of a location.
///
/// `previous_key` is the key of the sibling ordered immediately before the
/// child, or `None` when it is first.
pub trait ChildEventListener: Send + Sync + 'static {
    fn on_child_added(&self, snapshot: DataSnapshot, previous_key: Option<String>);

    fn on_child_changed(&self, _snapshot: DataSnapshot, _previous_key: Option<String>) {}

    fn on_child_removed(&self, _snapshot: DataSnapshot) {}

    /// Children only move under orderings other than by key, which this client
    /// does not evaluate, so this is never called today.
    fn on_child_moved(&self, _snapshot: DataSnapshot, _previous_key: Option<String>) {}

    fn on_cancelled(&self, _error: DatabaseError) {}
}

/// Adapts a closure into a [`ValueEventListener`] that ignores cancellation.
pub struct ValueFn<F>(pub F);

impl<F> ValueEventListener for ValueFn<F>
where
    F: Fn(DataSnapshot) + Send + Sync + 'static,
{
    fn on_data_change(&self, snapshot: DataSnapshot) {
        (self.0)(snapshot)
    }
}

/// Adapts a closure into a [`ChildEventListener`] handling only additions.
pub struct ChildAddedFn<F>(pub F);

impl<F> ChildEventListener for ChildAddedFn<F>
where
    F: Fn(DataSnapshot, Option<String>) + Send + Sync + 'static,
{
    fn on_child_added(&self, snapshot: DataSnapshot, previous_key: Option<String>) {
        (self.0)(snapshot, previous_key)
    }
}
