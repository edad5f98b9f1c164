//! Router error types.

use thiserror::Error;
use vigil_policy::CompilerError;

#[derive(Debug, Error)]
pub enum RouterError {
    /// A route with this name already exists in the table.
    #[error("route \"{0}\" already exists")]
    DuplicateRoute(String),

    /// No route with this name.
    #[error("route \"{0}\" not found")]
    RouteNotFound(String),

    /// The route's filter or policy failed to compile.
    #[error(transparent)]
    Compiler(#[from] CompilerError),
}
