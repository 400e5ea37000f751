//! Per-call query context

use qshape_expr::{ParameterValues, Value};

/// State owned by one in-flight query call
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    parameters: ParameterValues,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parameters(&self) -> &ParameterValues {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut ParameterValues {
        &mut self.parameters
    }

    pub fn add_parameter(&mut self, name: impl Into<String>, value: Value) {
        self.parameters.add(name, value);
    }
}
