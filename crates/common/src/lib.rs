pub mod error;

pub use error::{AvrosubError, Result, Stage};
