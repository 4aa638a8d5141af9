pub mod aggregate;
pub mod operator;
pub mod source;
