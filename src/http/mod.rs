pub(crate) mod message;
pub(crate) mod types;

pub use types::{Method, StatusCode, Version};
