//! Shared infrastructure for the remote build client: logging, host settings,
//! time helpers and the main-thread dispatch contract. Everything in here is
//! host-facing plumbing; the engine itself lives in `girder`.

pub mod dispatch;
pub mod logging;
pub mod settings;
pub mod time;
