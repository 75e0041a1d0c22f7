//! Synchronous facade for callers without an async runtime.
//!
//! [`BlockingJokeGateway`] drives each gateway operation to completion on a
//! tokio runtime shared by every blocking handle in the process. Do not call
//! it from inside another runtime's task; nested `block_on` panics.

use std::sync::LazyLock;

use tokio::runtime::{Builder, Runtime};

use crate::database::{DatabaseResult, ListenerRegistration};
use crate::jokes::{Joke, JokeGateway, User};

static RT: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Tokio runtime")
});

pub struct BlockingJokeGateway<G> {
    inner: G,
}

impl<G> std::fmt::Debug for BlockingJokeGateway<G>
where
    G: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingJokeGateway")
            .field("inner", &self.inner)
            .finish()
    }
}

impl<G> BlockingJokeGateway<G>
where
    G: JokeGateway,
{
    pub fn new(inner: G) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    pub fn create_user(&self, id: &str, name: &str, email: &str) {
        RT.block_on(self.inner.create_user(id, name, email))
    }

    pub fn listen_to_jokes<F>(&self, on_result: F) -> DatabaseResult<ListenerRegistration>
    where
        F: Fn(Joke) + Send + Sync + 'static,
    {
        RT.block_on(self.inner.listen_to_jokes(on_result))
    }

    pub fn add_new_joke<F>(&self, joke: Joke, on_result: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        RT.block_on(self.inner.add_new_joke(joke, on_result))
    }

    pub fn get_favorite_jokes<F>(
        &self,
        user_id: &str,
        on_result: F,
    ) -> DatabaseResult<ListenerRegistration>
    where
        F: Fn(Vec<Joke>) + Send + Sync + 'static,
    {
        RT.block_on(self.inner.get_favorite_jokes(user_id, on_result))
    }

    pub fn change_joke_favorite_status(&self, joke: &Joke, user_id: &str) {
        RT.block_on(self.inner.change_joke_favorite_status(joke, user_id))
    }

    pub fn get_profile<F>(&self, id: &str, on_result: F) -> DatabaseResult<ListenerRegistration>
    where
        F: Fn(User) + Send + Sync + 'static,
    {
        RT.block_on(self.inner.get_profile(id, on_result))
    }
}
