//! urlguard command line tool.
//!
//! - `check` validates URLs against a policy and reports the outcome
//! - `probe` validates a URL, connects to the validated address and reads
//!   response headers within the header budget
//!
//! Proxy variables are read once in `main` and passed down with the policy.

pub mod args;
pub mod check_cmd;
pub mod probe_cmd;

pub use args::{CheckArgs, Cli, Commands, PolicyArgs, ProbeArgs};
