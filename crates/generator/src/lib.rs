//! Client side of the shader generation service plus the bookkeeping that
//! keeps automatic fix requests bounded.
//!
//! The HTTP client is blocking; callers run it off their UI thread and feed
//! the results back into [`FixRetryCoordinator`], which decides whether a
//! response is still wanted.

mod client;
mod cycle;
mod fence;

pub use client::{
    GeneratorClient, GeneratorConfig, ServiceError, ShaderService, DEFAULT_API_BASE,
    DEFAULT_TIMEOUT,
};
pub use cycle::{
    CycleError, FixCycleState, FixRequest, FixRetryCoordinator, GenerateRequest, Resolution,
    Ticket, FIX_FAILED_MESSAGE, GENERATE_FAILED_MESSAGE, MAX_FIX_ATTEMPTS,
};
pub use fence::strip_code_fences;
