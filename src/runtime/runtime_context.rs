use std::sync::Arc;

use crate::common::config::ExecutionConfig;

/// Identity and shared settings of one operator in a query's tree.
///
/// Built once per query by whoever assembles the tree and handed to every
/// operator constructor; operators keep their own clone.
#[derive(Clone, Debug)]
pub struct OperatorContext {
    operator_id: u32,
    operator_name: String,
    config: Arc<ExecutionConfig>,
}

impl OperatorContext {
    pub fn new(operator_id: u32, operator_name: impl Into<String>, config: Arc<ExecutionConfig>) -> Self {
        Self {
            operator_id,
            operator_name: operator_name.into(),
            config,
        }
    }

    /// Context for another operator of the same query.
    pub fn for_operator(&self, operator_id: u32, operator_name: impl Into<String>) -> Self {
        Self::new(operator_id, operator_name, self.config.clone())
    }

    pub fn operator_id(&self) -> u32 { self.operator_id }
    pub fn operator_name(&self) -> &str { &self.operator_name }
    pub fn config(&self) -> &ExecutionConfig { &self.config }
}

impl Default for OperatorContext {
    fn default() -> Self {
        Self::new(0, "operator", Arc::new(ExecutionConfig::default()))
    }
}
