//! Core types: error codes, errors, runtime values and memory estimation

pub mod error;
pub mod error_code;
pub mod memory;
pub mod value;

pub use error::{FlashError, Result};
pub use error_code::{ErrorCategory, ErrorCode, ErrorInfo};
pub use memory::{MemoryFootprint, estimate};
pub use value::{FunctionValue, Lambda, Value, format_number};
