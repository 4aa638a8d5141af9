pub mod exchange_source;
pub mod values_source;

pub use exchange_source::ExchangeSourceOperator;
pub use values_source::ValuesOperator;
