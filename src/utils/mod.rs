pub mod sanitize;
pub mod timeout;
