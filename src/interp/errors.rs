use thiserror::Error;

/// Evaluation outcome kinds.
///
/// The local kinds abort only the initializer currently being evaluated; the
/// driver rolls abstract memory back and leaves the call in the IR. The
/// fatal kinds abort the whole pass and leave the module in an undefined
/// state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("instruction requires runtime information")]
    Unevaluable,

    #[error("unreachable instruction reached")]
    Unreachable,

    #[error("evaluation depth exceeded the recursion ceiling")]
    RecursionLimit,

    #[error("store to constant global @{0}")]
    WriteToConstant(String),

    #[error("pointer to a stack allocation escapes its frame")]
    EscapingAllocation,

    #[error("malformed IR: {0}")]
    MalformedIr(String),
}

impl EvalError {
    /// Local errors are recoverable by rollback; everything else is fatal.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            EvalError::Unevaluable | EvalError::Unreachable | EvalError::RecursionLimit
        )
    }
}

pub fn malformed(msg: impl Into<String>) -> EvalError {
    EvalError::MalformedIr(msg.into())
}
