use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use whysoserious::database::{Database, DatabaseBackend, DatabaseResult, InMemoryBackend};
use whysoserious::jokes::{Joke, JokeGateway, RealtimeJokeGateway, User};

/// Suspends once before every call, so concurrent writes interleave the way
/// they do over the network.
#[derive(Default)]
struct YieldingBackend {
    inner: InMemoryBackend,
}

#[async_trait]
impl DatabaseBackend for YieldingBackend {
    async fn set(&self, path: &[String], value: Value) -> DatabaseResult<()> {
        tokio::task::yield_now().await;
        self.inner.set(path, value).await
    }

    async fn update(
        &self,
        base_path: &[String],
        updates: Vec<(Vec<String>, Value)>,
    ) -> DatabaseResult<()> {
        tokio::task::yield_now().await;
        self.inner.update(base_path, updates).await
    }

    async fn delete(&self, path: &[String]) -> DatabaseResult<()> {
        tokio::task::yield_now().await;
        self.inner.delete(path).await
    }

    async fn get(&self, path: &[String], query: &[(String, String)]) -> DatabaseResult<Value> {
        tokio::task::yield_now().await;
        self.inner.get(path, query).await
    }
}

fn favorite(id: &str, text: &str) -> Joke {
    Joke {
        id: id.to_string(),
        author_name: "Ann".to_string(),
        author_id: "u1".to_string(),
        text: text.to_string(),
        is_favorite: true,
    }
}

fn collector<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(T) + Send + Sync + 'static) {
    let store = Arc::new(Mutex::new(Vec::new()));
    let sink = store.clone();
    (store, move |item| sink.lock().unwrap().push(item))
}

#[tokio::test]
async fn new_user_profile_has_no_favorites() {
    let gateway = RealtimeJokeGateway::new(Database::in_memory());
    gateway.create_user("u1", "Ann", "a@x.com").await;

    let (profiles, on_result) = collector::<User>();
    let _registration = gateway.get_profile("u1", on_result).await.unwrap();

    assert_eq!(
        profiles.lock().unwrap().as_slice(),
        &[User {
            id: "u1".to_string(),
            username: "Ann".to_string(),
            email: "a@x.com".to_string(),
            favorite_jokes: Vec::new(),
        }]
    );
}

#[tokio::test]
async fn profile_tracks_favorites_once_user_exists() {
    let gateway = RealtimeJokeGateway::new(Database::in_memory());
    let (profiles, on_result) = collector::<User>();
    let _registration = gateway.get_profile("u1", on_result).await.unwrap();
    assert!(profiles.lock().unwrap().is_empty());

    gateway.create_user("u1", "Ann", "a@x.com").await;
    gateway
        .change_joke_favorite_status(&favorite("j2", "two"), "u1")
        .await;
    gateway
        .change_joke_favorite_status(&favorite("j1", "one"), "u1")
        .await;
    gateway
        .database()
        .reference("user/u1/favorite/broken")
        .unwrap()
        .set(json!({ "text": "no id" }))
        .await
        .unwrap();

    let profiles = profiles.lock().unwrap();
    assert_eq!(profiles.len(), 4);
    assert!(profiles[0].favorite_jokes.is_empty());
    let latest = profiles.last().unwrap();
    assert_eq!(latest.username, "Ann");
    assert_eq!(
        latest.favorite_jokes,
        vec![favorite("j1", "one"), favorite("j2", "two")]
    );
}

#[tokio::test]
async fn joke_stream_delivers_valid_jokes_once() {
    let gateway = RealtimeJokeGateway::new(Database::in_memory());
    let jokes = gateway.database().reference("joke").unwrap();
    jokes
        .child("a")
        .unwrap()
        .set(json!({ "id": "a", "authorId": "u1", "text": "first" }))
        .await
        .unwrap();
    jokes
        .child("b")
        .unwrap()
        .set(json!({ "id": "b", "authorId": "u1", "text": "" }))
        .await
        .unwrap();
    jokes
        .child("c")
        .unwrap()
        .set(json!("not a joke"))
        .await
        .unwrap();

    let (received, on_result) = collector::<Joke>();
    let _registration = gateway.listen_to_jokes(on_result).await.unwrap();

    let (outcomes, on_added) = collector::<bool>();
    gateway
        .add_new_joke(Joke::new("Bob", "u2", "second"), on_added)
        .await;
    jokes
        .child("a")
        .unwrap()
        .set(json!({ "id": "a", "authorId": "u1", "text": "edited" }))
        .await
        .unwrap();

    assert_eq!(outcomes.lock().unwrap().as_slice(), &[true]);
    let texts: Vec<String> = received
        .lock()
        .unwrap()
        .iter()
        .map(|joke| joke.text.clone())
        .collect();
    assert_eq!(texts, vec!["first", "second"]);
}

#[tokio::test]
async fn concurrent_jokes_are_delivered_once_each() {
    let database = Database::with_backend(Arc::new(YieldingBackend::default()));
    let gateway = RealtimeJokeGateway::new(database);

    let (received, on_result) = collector::<Joke>();
    let _registration = gateway.listen_to_jokes(on_result).await.unwrap();

    let (outcomes, on_added) = collector::<bool>();
    let on_added = Arc::new(on_added);
    let (first, second) = (on_added.clone(), on_added.clone());
    tokio::join!(
        gateway.add_new_joke(Joke::new("Ann", "u1", "one"), move |ok| first(ok)),
        gateway.add_new_joke(Joke::new("Bob", "u2", "two"), move |ok| second(ok)),
    );

    assert_eq!(outcomes.lock().unwrap().as_slice(), &[true, true]);
    let mut texts: Vec<String> = received
        .lock()
        .unwrap()
        .iter()
        .map(|joke| joke.text.clone())
        .collect();
    texts.sort();
    assert_eq!(texts, vec!["one", "two"]);
}

#[tokio::test]
async fn joke_feed_yields_pushed_jokes() {
    let gateway = RealtimeJokeGateway::new(Database::in_memory());
    let feed = gateway.joke_feed().await.unwrap();
    assert_eq!(feed.try_next(), None);

    gateway
        .add_new_joke(Joke::new("Ann", "u1", "knock knock"), |_| {})
        .await;

    let joke = feed.next().await.unwrap();
    assert_eq!(joke.text, "knock knock");
    assert!(!joke.id.is_empty());
}

#[tokio::test]
async fn favorites_follow_toggles() {
    let gateway = RealtimeJokeGateway::new(Database::in_memory());
    let (reports, on_result) = collector::<Vec<Joke>>();
    let _registration = gateway
        .get_favorite_jokes("u1", on_result)
        .await
        .unwrap();

    let joke = favorite("j1", "one");
    gateway.change_joke_favorite_status(&joke, "u1").await;
    gateway.change_joke_favorite_status(&joke, "u1").await;

    assert_eq!(
        reports.lock().unwrap().as_slice(),
        &[Vec::new(), vec![joke.clone()], Vec::new()]
    );
}

#[tokio::test]
async fn cancelled_favorites_report_empty_list() {
    let backend = Arc::new(InMemoryBackend::default());
    backend.deny_read("user/u1/favorite");
    let gateway = RealtimeJokeGateway::new(Database::with_backend(backend));

    let (reports, on_result) = collector::<Vec<Joke>>();
    let registration = gateway
        .get_favorite_jokes("u1", on_result)
        .await
        .unwrap();

    assert_eq!(reports.lock().unwrap().as_slice(), &[Vec::<Joke>::new()]);
    assert!(!registration.is_active());
}

#[tokio::test]
async fn empty_user_id_is_rejected() {
    let gateway = RealtimeJokeGateway::new(Database::in_memory());
    let err = gateway.get_profile("", |_| {}).await.unwrap_err();
    assert_eq!(err.code_str(), "database/invalid-argument");
}
