pub mod error;

pub use error::AutomationError;
