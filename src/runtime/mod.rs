pub mod driver;
pub mod functions;
pub mod operators;
pub mod runtime_context;
pub mod window;
