pub mod backends;
pub mod error;
pub mod future;
pub mod net;
pub mod ops;
pub mod runtime;
pub mod tensor;
pub mod workspace;

// used by `precondition!` in downstream crates
#[doc(hidden)]
pub use tracing as __tracing;
