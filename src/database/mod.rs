//! # Realtime Database client
//!
//! A small Realtime Database client modelled on the Firebase SDKs: path
//! references, one-shot reads, writes, push ids, key-ordered queries and
//! value/child listeners.
//!
//! Two backends are provided. [`InMemoryBackend`] keeps the tree in process
//! and is what tests and offline callers use; [`RestBackend`] talks to a hosted
//! database or the emulator through the REST API. Listener notification is
//! local to a [`Database`] handle: every write made through it re-reads the
//! affected listener targets and dispatches events. Changes made by other
//! clients are not streamed.
//!
//! ## Example
//!
//! ```
//! use whysoserious::database::{Database, DatabaseResult};
//! use serde_json::json;
//!
//! # fn main() -> DatabaseResult<()> {
//! # futures::executor::block_on(async {
//! let database = Database::in_memory();
//! let jokes = database.reference("joke")?;
//!
//! let _feed = jokes
//!     .on_child_added(|snapshot, _previous| println!("new joke {:?}", snapshot.key()))
//!     .await;
//! jokes.push_with_value(json!({ "text": "knock knock" })).await?;
//! # Ok(())
//! # })
//! # }
//! ```

mod api;
mod backend;
pub mod error;
mod listener;
mod options;
mod push_id;
mod query;

#[doc(inline)]
pub use api::{DataSnapshot, Database, DatabaseQuery, DatabaseReference, ListenerRegistration};

#[doc(inline)]
pub use backend::{DatabaseBackend, InMemoryBackend, RestBackend};

#[doc(inline)]
pub use error::{DatabaseError, DatabaseErrorCode, DatabaseResult};

#[doc(inline)]
pub use listener::{ChildAddedFn, ChildEventListener, ValueEventListener, ValueFn};

#[doc(inline)]
pub use options::DatabaseOptions;
