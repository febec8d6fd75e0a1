use std::fmt;

/// Errors raised while compiling or evaluating a statement
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FacetError {
    /// Malformed statement structure
    Parse(String),
    /// No bracketed literal or generator call where the datum should be
    DatumParse(String),
    /// An operator argument that could not be classified or evaluated
    ArgumentParse { fragment: String, message: String },
    /// Name not present in the operator registry
    UnknownOperator(String),
    /// Runtime failure inside a transform
    Evaluation(String),
    /// Invalid tempo or step count
    TransportConfig(String),
}

impl FacetError {
    pub fn parse(message: impl Into<String>) -> Self {
        FacetError::Parse(message.into())
    }

    pub fn argument(fragment: impl Into<String>, message: impl Into<String>) -> Self {
        FacetError::ArgumentParse {
            fragment: fragment.into(),
            message: message.into(),
        }
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        FacetError::Evaluation(message.into())
    }
}

impl fmt::Display for FacetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FacetError::Parse(msg) => write!(f, "Parse error: {}", msg),
            FacetError::DatumParse(msg) => write!(f, "Could not parse datum: {}", msg),
            FacetError::ArgumentParse { fragment, message } => {
                write!(f, "Could not parse argument '{}': {}", fragment, message)
            }
            FacetError::UnknownOperator(name) => write!(f, "Unknown operator '{}'", name),
            FacetError::Evaluation(msg) => write!(f, "Evaluation error: {}", msg),
            FacetError::TransportConfig(msg) => write!(f, "Transport config error: {}", msg),
        }
    }
}

impl std::error::Error for FacetError {}

pub type Result<T> = std::result::Result<T, FacetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_fragment() {
        let err = FacetError::argument("foo(", "unbalanced parentheses");
        assert_eq!(
            err.to_string(),
            "Could not parse argument 'foo(': unbalanced parentheses"
        );
    }
}
