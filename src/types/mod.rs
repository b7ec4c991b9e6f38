#![forbid(unsafe_code)]

//! Shared value and error types.

mod error;
mod value;

pub use error::{
    DriverError, DriverResult, FetchError, FetchResult, MismatchError, PersistError,
    PersistResult, SqlErrorKind,
};
pub use value::{SqlType, Value};
