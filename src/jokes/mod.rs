//! # Jokes data access
//!
//! Maps the app's operations onto the Realtime Database tree:
//!
//! ```text
//! user/{userId}                      -> { id, username, email }
//! user/{userId}/favorite/{jokeId}    -> full joke, present while favorited
//! joke/{jokeId}                      -> joke, keyed by push id
//! ```
//!
//! Records read back from the database are decoded into the `*Response` types,
//! which tolerate missing fields, and then mapped to the domain types. Records
//! that cannot be mapped are dropped rather than reported.
//!
//! ## Example
//!
//! ```
//! use whysoserious::database::Database;
//! use whysoserious::jokes::{JokeGateway, RealtimeJokeGateway};
//!
//! # futures::executor::block_on(async {
//! let gateway = RealtimeJokeGateway::new(Database::in_memory());
//! gateway.create_user("u1", "Ann", "a@x.com").await;
//!
//! let _profile = gateway
//!     .get_profile("u1", |user| println!("{} <{}>", user.username, user.email))
//!     .await
//!     .unwrap();
//! # });
//! ```

mod constants;
mod gateway;
mod model;

#[doc(inline)]
pub use gateway::{JokeFeed, JokeGateway, RealtimeJokeGateway};

#[doc(inline)]
pub use model::{Joke, JokeResponse, User, UserResponse};
