//! Binary Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("could not set up logging")]
    Logging,
    #[display("could not open storage root")]
    Storage,
    #[display("invalid origin")]
    Origin,
    #[display("cache usage operation failed")]
    Quota,
    #[display("interrupted")]
    Interrupted,
}
