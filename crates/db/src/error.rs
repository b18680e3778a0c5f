#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// The input violated a schema constraint.
    BadInput,
    /// No row matched the request.
    NotFound,
    /// Unrecoverable error.
    Fatal,
}

pub type Result<T> = core::result::Result<T, Error>;
