//! Network-boot block targets.
//!
//! Each snapshot carries a `maas.tgt` descriptor listing one target per
//! image. The registrar regenerates it from the snapshot tree and asks the
//! tgt daemon to reconcile against it. Daemon problems are never fatal to
//! an import.

mod daemon;
mod descriptor;
mod registrar;

use std::io;
use std::time::Duration;

use thiserror::Error;

pub use daemon::{ServiceMonitor, SystemdService, TargetDaemon, TgtAdmin, TgtAdminConfig};
pub use descriptor::{
    compose_descriptor, render_descriptor, scan_images, write_descriptor, TargetEntry, IQN_PREFIX,
};
pub use registrar::{RegistrarOutcome, TargetRegistrar};

#[derive(Debug, Error)]
pub enum TargetDaemonError {
    #[error("Service {service} not active after {waited:?}")]
    NotReady { service: String, waited: Duration },

    #[error("{command} did not finish within {waited:?}")]
    Timeout { command: String, waited: Duration },

    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{command} exited with {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}
