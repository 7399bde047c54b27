//! Operation kinds of the graph IR.

use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum Op {
    /// Graph input bound per request
    Parameter,
    /// Weights or other data known at compile time
    Constant { data: Arc<[u8]> },
    /// Graph output
    Result,
    Reshape,
    Squeeze,
    Unsqueeze,
    /// Kernel-backed operation, resolved through the operation registry
    Compute { type_name: String },
}

impl Op {
    pub const PARAMETER: &'static str = "Parameter";
    pub const CONSTANT: &'static str = "Constant";
    pub const RESULT: &'static str = "Result";
    pub const RESHAPE: &'static str = "Reshape";
    pub const SQUEEZE: &'static str = "Squeeze";
    pub const UNSQUEEZE: &'static str = "Unsqueeze";

    pub fn compute(type_name: impl Into<String>) -> Self {
        Op::Compute {
            type_name: type_name.into(),
        }
    }

    pub fn constant(data: impl Into<Arc<[u8]>>) -> Self {
        Op::Constant { data: data.into() }
    }

    /// Name the operation registry knows this kind by
    pub fn type_name(&self) -> &str {
        match self {
            Op::Parameter => Self::PARAMETER,
            Op::Constant { .. } => Self::CONSTANT,
            Op::Result => Self::RESULT,
            Op::Reshape => Self::RESHAPE,
            Op::Squeeze => Self::SQUEEZE,
            Op::Unsqueeze => Self::UNSQUEEZE,
            Op::Compute { type_name } => type_name,
        }
    }

    /// Output shares the input's memory
    pub fn is_view(&self) -> bool {
        matches!(self, Op::Reshape | Op::Squeeze | Op::Unsqueeze)
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Op::Constant { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(Op::Parameter.type_name(), "Parameter");
        assert_eq!(Op::constant(vec![1u8, 2]).type_name(), "Constant");
        assert_eq!(Op::compute("Add").type_name(), "Add");
        assert!(Op::Squeeze.is_view());
        assert!(!Op::compute("Reshape2").is_view());
    }
}
