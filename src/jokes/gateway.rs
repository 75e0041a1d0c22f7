use std::sync::LazyLock;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;

use crate::database::error::invalid_argument;
use crate::database::{
    ChildEventListener, DataSnapshot, Database, DatabaseError, DatabaseReference, DatabaseResult,
    ListenerRegistration, ValueEventListener,
};
use crate::jokes::constants::{KEY_FAVORITE, KEY_JOKE, KEY_USER};
use crate::jokes::model::{Joke, JokeResponse, User, UserResponse};
use crate::logger::Logger;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@whysoserious/jokes"));

/// Data access operations used by the app.
///
/// Results are delivered through callbacks. Operations that subscribe return
/// the [`ListenerRegistration`] keeping the subscription alive; the only error
/// they surface is an unusable path (for example an empty user id).
#[async_trait]
pub trait JokeGateway: Send + Sync {
    /// Writes `{id, username, email}` at `user/{id}`, replacing whatever was
    /// there, favorites included. Failures are logged only.
    async fn create_user(&self, id: &str, name: &str, email: &str);

    /// Streams every valid joke under `joke` in key order, existing ones
    /// first. Changes to and removals of jokes are ignored.
    async fn listen_to_jokes<F>(&self, on_result: F) -> DatabaseResult<ListenerRegistration>
    where
        F: Fn(Joke) + Send + Sync + 'static;

    /// Stores `joke` under a freshly generated key, which becomes its id.
    /// `on_result` receives `true` iff the write completed.
    async fn add_new_joke<F>(&self, joke: Joke, on_result: F)
    where
        F: FnOnce(bool) + Send + 'static;

    /// Reports the user's favorites on every change, or an empty list when
    /// the subscription is cancelled.
    async fn get_favorite_jokes<F>(
        &self,
        user_id: &str,
        on_result: F,
    ) -> DatabaseResult<ListenerRegistration>
    where
        F: Fn(Vec<Joke>) + Send + Sync + 'static;

    /// Favorites `joke` for the user if it is not yet a favorite, otherwise
    /// removes it.
    ///
    /// This reads and then writes with no isolation: two toggles racing on the
    /// same joke can both observe the same state and cancel or duplicate each
    /// other.
    async fn change_joke_favorite_status(&self, joke: &Joke, user_id: &str);

    /// Reports the full profile, favorites included, on every change to
    /// `user/{id}`. Nothing is reported while the record is absent.
    async fn get_profile<F>(&self, id: &str, on_result: F) -> DatabaseResult<ListenerRegistration>
    where
        F: Fn(User) + Send + Sync + 'static;
}

/// [`JokeGateway`] backed by a Realtime Database tree laid out as
/// `user/{id}`, `user/{id}/favorite/{jokeId}` and `joke/{jokeId}`.
#[derive(Clone, Debug)]
pub struct RealtimeJokeGateway {
    database: Database,
}

impl RealtimeJokeGateway {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Same stream as [`JokeGateway::listen_to_jokes`], delivered through a
    /// channel instead of a callback.
    pub async fn joke_feed(&self) -> DatabaseResult<JokeFeed> {
        let (sender, receiver) = async_channel::unbounded();
        let registration = self
            .listen_to_jokes(move |joke| forward(&sender, joke))
            .await?;
        Ok(JokeFeed {
            receiver,
            _registration: registration,
        })
    }

    fn user_reference(&self, user_id: &str) -> DatabaseResult<DatabaseReference> {
        if user_id.trim().is_empty() {
            return Err(invalid_argument("User id cannot be empty"));
        }
        self.database.reference(KEY_USER)?.child(user_id)
    }

    fn favorite_reference(&self, user_id: &str, joke_id: &str) -> DatabaseResult<DatabaseReference> {
        if joke_id.trim().is_empty() {
            return Err(invalid_argument("Joke id cannot be empty"));
        }
        self.user_reference(user_id)?
            .child(KEY_FAVORITE)?
            .child(joke_id)
    }
}

fn forward(sender: &Sender<Joke>, joke: Joke) {
    if sender.try_send(joke).is_err() {
        log::debug!("joke feed receiver dropped");
    }
}

#[async_trait]
impl JokeGateway for RealtimeJokeGateway {
    async fn create_user(&self, id: &str, name: &str, email: &str) {
        let user = User::new(id, name, email);
        let reference = match self.user_reference(id) {
            Ok(reference) => reference,
            Err(err) => {
                LOGGER.warn(format!("create_user({id}) skipped: {err}"));
                return;
            }
        };
        if let Err(err) = reference.set_value(&user).await {
            LOGGER.warn(format!("create_user({id}) failed: {err}"));
        }
    }

    async fn listen_to_jokes<F>(&self, on_result: F) -> DatabaseResult<ListenerRegistration>
    where
        F: Fn(Joke) + Send + Sync + 'static,
    {
        let query = self.database.reference(KEY_JOKE)?.order_by_key()?;
        Ok(query
            .add_child_event_listener(JokeFeedListener { on_result })
            .await)
    }

    async fn add_new_joke<F>(&self, joke: Joke, on_result: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let reference = match self
            .database
            .reference(KEY_JOKE)
            .and_then(|jokes| jokes.push())
        {
            Ok(reference) => reference,
            Err(err) => {
                LOGGER.warn(format!("add_new_joke could not generate a key: {err}"));
                on_result(false);
                return;
            }
        };

        let mut joke = joke;
        if let Some(key) = reference.key() {
            joke.id = key.to_string();
        }

        match reference.set_value(&joke).await {
            Ok(()) => on_result(true),
            Err(err) => {
                LOGGER.warn(format!("add_new_joke({}) failed: {err}", joke.id));
                on_result(false);
            }
        }
    }

    async fn get_favorite_jokes<F>(
        &self,
        user_id: &str,
        on_result: F,
    ) -> DatabaseResult<ListenerRegistration>
    where
        F: Fn(Vec<Joke>) + Send + Sync + 'static,
    {
        let favorites = self.user_reference(user_id)?.child(KEY_FAVORITE)?;
        Ok(favorites
            .add_value_event_listener(FavoriteJokesListener { on_result })
            .await)
    }

    async fn change_joke_favorite_status(&self, joke: &Joke, user_id: &str) {
        let reference = match self.favorite_reference(user_id, &joke.id) {
            Ok(reference) => reference,
            Err(err) => {
                LOGGER.warn(format!("change_joke_favorite_status skipped: {err}"));
                return;
            }
        };

        let current = match reference.get().await {
            Ok(snapshot) => snapshot.deserialize::<JokeResponse>(),
            Err(err) => {
                LOGGER.warn(format!(
                    "change_joke_favorite_status could not read {}: {err}",
                    reference.path()
                ));
                return;
            }
        };

        let result = match current {
            Some(_) => reference.remove().await,
            None => reference.set_value(joke).await,
        };
        if let Err(err) = result {
            LOGGER.warn(format!(
                "change_joke_favorite_status could not write {}: {err}",
                reference.path()
            ));
        }
    }

    async fn get_profile<F>(&self, id: &str, on_result: F) -> DatabaseResult<ListenerRegistration>
    where
        F: Fn(User) + Send + Sync + 'static,
    {
        let reference = self.user_reference(id)?;
        Ok(reference
            .add_value_event_listener(ProfileListener {
                id: id.to_string(),
                on_result,
            })
            .await)
    }
}

/// Receiving end of [`RealtimeJokeGateway::joke_feed`]. Dropping it detaches
/// the underlying listener.
#[derive(Debug)]
pub struct JokeFeed {
    receiver: Receiver<Joke>,
    _registration: ListenerRegistration,
}

impl JokeFeed {
    /// Waits for the next joke. Returns `None` only if the feed was closed.
    pub async fn next(&self) -> Option<Joke> {
        self.receiver.recv().await.ok()
    }

    /// Returns an already delivered joke without waiting.
    pub fn try_next(&self) -> Option<Joke> {
        self.receiver.try_recv().ok()
    }
}

fn map_jokes(snapshots: &[DataSnapshot]) -> Vec<Joke> {
    snapshots
        .iter()
        .filter_map(DataSnapshot::deserialize::<JokeResponse>)
        .filter_map(|response| response.map_to_joke())
        .collect()
}

struct JokeFeedListener<F> {
    on_result: F,
}

impl<F> ChildEventListener for JokeFeedListener<F>
where
    F: Fn(Joke) + Send + Sync + 'static,
{
    fn on_child_added(&self, snapshot: DataSnapshot, _previous_key: Option<String>) {
        let Some(response) = snapshot.deserialize::<JokeResponse>() else {
            return;
        };
        if !response.is_valid() {
            return;
        }
        if let Some(joke) = response.map_to_joke() {
            (self.on_result)(joke);
        }
    }
}

struct FavoriteJokesListener<F> {
    on_result: F,
}

impl<F> ValueEventListener for FavoriteJokesListener<F>
where
    F: Fn(Vec<Joke>) + Send + Sync + 'static,
{
    fn on_data_change(&self, snapshot: DataSnapshot) {
        (self.on_result)(map_jokes(&snapshot.children()));
    }

    fn on_cancelled(&self, error: DatabaseError) {
        LOGGER.warn(format!("favorite jokes listener cancelled: {error}"));
        (self.on_result)(Vec::new());
    }
}

struct ProfileListener<F> {
    id: String,
    on_result: F,
}

impl<F> ValueEventListener for ProfileListener<F>
where
    F: Fn(User) + Send + Sync + 'static,
{
    fn on_data_change(&self, snapshot: DataSnapshot) {
        let Some(response) = snapshot.deserialize::<UserResponse>() else {
            return;
        };
        let favorites = snapshot
            .child(KEY_FAVORITE)
            .map(|favorites| map_jokes(&favorites.children()))
            .unwrap_or_default();
        (self.on_result)(response.map_to_user(self.id.as_str(), favorites));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryBackend;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn gateway() -> RealtimeJokeGateway {
        RealtimeJokeGateway::new(Database::in_memory())
    }

    fn stored_joke(id: &str, text: &str) -> Joke {
        Joke {
            id: id.to_string(),
            author_name: "Ann".to_string(),
            author_id: "u1".to_string(),
            text: text.to_string(),
            is_favorite: false,
        }
    }

    #[tokio::test]
    async fn create_user_overwrites_existing_record() {
        let gateway = gateway();
        let user = gateway.database().reference("user/u1").unwrap();
        user.set(json!({ "username": "old", "favorite": { "j1": { "id": "j1" } } }))
            .await
            .unwrap();

        gateway.create_user("u1", "Ann", "a@x.com").await;

        assert_eq!(
            user.get().await.unwrap().into_value(),
            json!({ "id": "u1", "username": "Ann", "email": "a@x.com" })
        );
    }

    #[tokio::test]
    async fn add_new_joke_assigns_generated_key() {
        let gateway = gateway();
        let outcome = Arc::new(Mutex::new(None));
        let sink = outcome.clone();

        gateway
            .add_new_joke(Joke::new("Ann", "u1", "knock knock"), move |ok| {
                *sink.lock().unwrap() = Some(ok);
            })
            .await;

        assert_eq!(*outcome.lock().unwrap(), Some(true));
        let jokes = gateway
            .database()
            .reference("joke")
            .unwrap()
            .get()
            .await
            .unwrap();
        let children = jokes.children();
        assert_eq!(children.len(), 1);
        let stored = children[0].deserialize::<JokeResponse>().unwrap();
        assert_eq!(stored.id.as_deref(), children[0].key());
        assert_eq!(stored.text.as_deref(), Some("knock knock"));
    }

    #[tokio::test]
    async fn add_new_joke_reports_write_failure() {
        let backend = Arc::new(InMemoryBackend::default());
        backend.deny_write("joke");
        let gateway = RealtimeJokeGateway::new(Database::with_backend(backend));
        let outcome = Arc::new(Mutex::new(None));
        let sink = outcome.clone();

        gateway
            .add_new_joke(Joke::new("Ann", "u1", "knock knock"), move |ok| {
                *sink.lock().unwrap() = Some(ok);
            })
            .await;

        assert_eq!(*outcome.lock().unwrap(), Some(false));
    }

    #[tokio::test]
    async fn toggling_twice_restores_absence() {
        let gateway = gateway();
        let joke = stored_joke("j1", "pun");
        let favorite = gateway
            .database()
            .reference("user/u1/favorite/j1")
            .unwrap();

        gateway.change_joke_favorite_status(&joke, "u1").await;
        assert_eq!(
            favorite.get().await.unwrap().deserialize::<JokeResponse>().and_then(|r| r.map_to_joke()),
            Some(joke.clone())
        );

        gateway.change_joke_favorite_status(&joke, "u1").await;
        assert!(!favorite.get().await.unwrap().exists());
    }

    #[tokio::test]
    async fn toggle_with_empty_joke_id_does_nothing() {
        let gateway = gateway();
        let favorites = gateway.database().reference("user/u1/favorite").unwrap();
        favorites
            .child("j1")
            .unwrap()
            .set(json!({ "id": "j1", "authorId": "u1", "text": "x" }))
            .await
            .unwrap();

        gateway
            .change_joke_favorite_status(&stored_joke("", "x"), "u1")
            .await;

        assert_eq!(favorites.get().await.unwrap().size(), 1);
    }

    #[tokio::test]
    async fn listener_operations_reject_empty_user_id() {
        let gateway = gateway();
        let err = gateway.get_profile(" ", |_| {}).await.unwrap_err();
        assert_eq!(err.code_str(), "database/invalid-argument");
        assert!(gateway.get_favorite_jokes("", |_| {}).await.is_err());
    }

    #[tokio::test]
    async fn joke_feed_delivers_through_channel() {
        let gateway = gateway();
        gateway
            .database()
            .reference("joke/a")
            .unwrap()
            .set_value(&stored_joke("a", "first"))
            .await
            .unwrap();

        let feed = gateway.joke_feed().await.unwrap();
        gateway.add_new_joke(Joke::new("Bob", "u2", "second"), |_| {}).await;

        assert_eq!(feed.next().await.map(|joke| joke.text), Some("first".to_string()));
        assert_eq!(feed.next().await.map(|joke| joke.text), Some("second".to_string()));
        assert!(feed.try_next().is_none());
    }
}
