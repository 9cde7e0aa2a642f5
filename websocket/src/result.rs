//! [`Result`] type alias bound to the session engine [`enum@super::error::Error`]

pub type Result<T> = std::result::Result<T, super::error::Error>;
