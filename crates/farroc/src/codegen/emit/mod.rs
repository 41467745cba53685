//! Top-level function emission
//!
//! One compilation request per function body. Declarations are created on
//! demand and reused by handle, so calls, address-taking, and later
//! definition of the same function all resolve to one module entity.

pub mod functions;
