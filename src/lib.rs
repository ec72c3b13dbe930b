//! Compile-time evaluation of package initializers.
//!
//! The `interp` pass walks a module's aggregated initializer function,
//! executes as much of it as can be proven side-effect-safe, and replaces
//! dynamic initialization with constant global initializers. The `ir`
//! module provides the self-contained module container it operates on.

pub mod interp;
pub mod ir;

pub use interp::errors::EvalError;
pub use interp::run;
