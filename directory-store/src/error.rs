use thiserror::Error;

/// Errors produced by a [Store](crate::Store) backend
#[derive(Error, Debug)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("invalid database url: {0}")]
    Config(String),
    #[error("no {0} row after insert")]
    MissingRow(&'static str),
}

impl From<bb8::RunError<tokio_postgres::Error>> for Error {
    fn from(e: bb8::RunError<tokio_postgres::Error>) -> Self {
        match e {
            bb8::RunError::User(e) => Error::Database(e),
            bb8::RunError::TimedOut => Error::Pool("timed out waiting for a connection".into()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
