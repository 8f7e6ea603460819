//! Library surface behind the `unsharedfs` binary, split out so that
//! `tests/` can drive the resolver, config validation, and credential
//! scope directly, the same way the teacher's own `ll`/`mnt` modules are
//! unit-testable independently of `fuser::mount2`.

pub mod attrs;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod fs;
pub mod inodes;
pub mod logger;
pub mod resolver;
