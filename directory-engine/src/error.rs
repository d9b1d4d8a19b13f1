use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("store error: {0}")]
    Store(#[from] directory_store::Error),
    #[error("unable to publish {0}")]
    Publish(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
