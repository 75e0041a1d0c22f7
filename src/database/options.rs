/// Connection settings for a [`Database`](crate::database::Database).
///
/// Leaving `database_url` unset selects the in-memory backend. The URL may
/// carry a query string such as `?ns=demo` (emulator namespace), which is
/// forwarded on every request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DatabaseOptions {
    pub database_url: Option<String>,
    /// ID token sent as the `auth` query parameter.
    pub auth_token: Option<String>,
}

impl DatabaseOptions {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            database_url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}
