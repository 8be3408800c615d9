//! salt-step: run SaltStack jobs through salt-api from a build pipeline and
//! fail the step unless every minion returns cleanly.
//!
//! The `salt` module holds the embeddable core; the `salt-step` binary is a
//! thin CLI host around it.

pub mod salt;
