//! Filesystem composition for cluster nodes.
//!
//! - **composer**: the read-only base layer (generated and templated files)
//! - **copy**: binaries copied into the base layer during Create
//! - **overlay**: per-node overlay triples for `/etc`, `/opt`, `/usr/bin`
//! - **guard**: removes a half-created cluster directory

mod composer;
mod copy;
mod guard;
mod overlay;
mod templates;

pub use composer::{BOOTSTRAP_SCRIPT_PATH, BaseFile, base_files, prepare_base};
pub use copy::{CopyJob, KUBE_BINARIES, copy_into_base, copy_jobs, kube_binary_dir};
pub use guard::CreateGuard;
pub use overlay::{OVERLAY_TARGETS, OverlaySpec, overlay_specs_for};
pub use templates::{TemplateRenderer, TemplateVars};
