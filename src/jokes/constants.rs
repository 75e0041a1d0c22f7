pub(crate) const KEY_USER: &str = "user";
pub(crate) const KEY_JOKE: &str = "joke";
pub(crate) const KEY_FAVORITE: &str = "favorite";
