//! Engine for driving builds on a remote host: a framed binary protocol, a
//! non-blocking connection engine multiplexed by a single I/O worker, and the
//! project file-set model used to mirror source folders onto the build host.
//!
//! The editor host side of the picture (commands, panels, prompts) stays out
//! of this crate; it talks to the engine through `plumb::dispatch` and the
//! traits in [`build`].

pub mod build;
pub mod digest;
pub mod files;
pub mod net;
pub mod proto;
