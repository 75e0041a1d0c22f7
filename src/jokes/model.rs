use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Joke {
    pub id: String,
    pub author_name: String,
    pub author_id: String,
    pub text: String,
    #[serde(rename = "favorite")]
    pub is_favorite: bool,
}

impl Joke {
    pub fn new(
        author_name: impl Into<String>,
        author_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            author_name: author_name.into(),
            author_id: author_id.into(),
            text: text.into(),
            is_favorite: false,
        }
    }
}

/// Profile as exposed to the app. Favorites are stored under the `favorite`
/// child of the user record and never serialized with it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub favorite_jokes: Vec<Joke>,
}

impl User {
    pub fn new(id: impl Into<String>, username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            email: email.into(),
            favorite_jokes: Vec::new(),
        }
    }
}

/// Joke as stored in the database. Any field may be missing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JokeResponse {
    pub id: Option<String>,
    pub author_name: Option<String>,
    pub author_id: Option<String>,
    pub text: Option<String>,
    pub favorite: Option<bool>,
}

impl JokeResponse {
    /// Whether the record is complete enough to show in the feed: it must map
    /// and carry a non-blank id, author id and text.
    pub fn is_valid(&self) -> bool {
        let filled = |field: &Option<String>| field.as_deref().is_some_and(|v| !v.trim().is_empty());
        filled(&self.id) && filled(&self.author_id) && filled(&self.text)
    }

    /// Converts to a [`Joke`], or `None` when `id`, `authorId` or `text` is
    /// missing.
    pub fn map_to_joke(&self) -> Option<Joke> {
        Some(Joke {
            id: self.id.clone()?,
            author_name: self.author_name.clone().unwrap_or_default(),
            author_id: self.author_id.clone()?,
            text: self.text.clone()?,
            is_favorite: self.favorite.unwrap_or(false),
        })
    }
}

/// User record as stored in the database; missing fields read as empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub email: String,
}

impl UserResponse {
    pub fn map_to_user(self, id: impl Into<String>, favorite_jokes: Vec<Joke>) -> User {
        User {
            id: id.into(),
            username: self.username,
            email: self.email,
            favorite_jokes,
        }
    }
}
