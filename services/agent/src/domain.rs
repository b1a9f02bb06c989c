//! Hypervisor domain handling.
//!
//! A VM's persisted domain descriptor lives at
//! `{instances_path}/{vm_name}/libvirt.xml`. Recovery re-defines the domain
//! from that file and starts it. Packet filter references are stripped
//! first because the destination host has no filters for this VM yet.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::{Captures, Regex};
use tracing::{debug, info};

use crate::command::{run_checked, CommandRunner, HostCommand};
use crate::error::StepError;

/// File name of the descriptor inside the per-VM directory.
pub const DESCRIPTOR_FILE: &str = "libvirt.xml";

// Comments are matched first so filter references inside them are kept.
// Attribute values may contain `>`.
static FILTERREF: LazyLock<Regex> = LazyLock::new(|| {
    const ATTRS: &str = r#"(?:[^>"']|"[^"]*"|'[^']*')*"#;
    Regex::new(&format!(
        r"(?s)(?P<comment><!--.*?-->)|[ \t]*(?:<filterref\b{ATTRS}/>|<filterref\b{ATTRS}>.*?</filterref\s*>)[ \t]*\n?"
    ))
    .expect("filterref pattern is valid")
});

/// Remove every `<filterref>` element from a domain descriptor.
///
/// Returns the rewritten document and the number of elements removed.
/// Elements inside XML comments are left alone.
pub fn strip_filter_refs(xml: &str) -> (String, usize) {
    let count = FILTERREF
        .captures_iter(xml)
        .filter(|caps| caps.name("comment").is_none())
        .count();
    if count == 0 {
        return (xml.to_string(), 0);
    }

    let stripped = FILTERREF.replace_all(xml, |caps: &Captures<'_>| match caps.name("comment") {
        Some(comment) => comment.as_str().to_string(),
        None => String::new(),
    });
    (stripped.into_owned(), count)
}

/// Returns true if `vm_name` is safe to use as a directory under the
/// instances path.
pub fn is_valid_vm_name(vm_name: &str) -> bool {
    !vm_name.is_empty()
        && !vm_name.starts_with('.')
        && vm_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// The on-disk descriptor of one VM.
#[derive(Debug, Clone)]
pub struct DomainDescriptor {
    path: PathBuf,
}

impl DomainDescriptor {
    /// Locate the descriptor of `vm_name` under `instances_path`.
    pub fn for_instance(instances_path: &Path, vm_name: &str) -> Self {
        Self {
            path: instances_path.join(vm_name).join(DESCRIPTOR_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Strip filter references in place. The file is only rewritten if
    /// something was removed.
    pub async fn strip_filter_refs(&self) -> Result<usize, StepError> {
        let xml = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| self.error(source))?;

        let (stripped, removed) = strip_filter_refs(&xml);
        if removed > 0 {
            tokio::fs::write(&self.path, stripped)
                .await
                .map_err(|source| self.error(source))?;
            debug!(path = %self.path.display(), removed, "Removed filter references");
        }

        Ok(removed)
    }

    fn error(&self, source: std::io::Error) -> StepError {
        StepError::Descriptor {
            path: self.path.clone(),
            source,
        }
    }
}

/// Hypervisor operations used by recovery.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Register a domain from its descriptor file.
    async fn define_domain(&self, descriptor: &Path) -> Result<(), StepError>;

    /// Boot a defined domain.
    async fn start_domain(&self, vm_name: &str) -> Result<(), StepError>;
}

/// `Hypervisor` driven through `virsh`.
pub struct VirshHypervisor {
    runner: Arc<dyn CommandRunner>,
}

impl VirshHypervisor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Hypervisor for VirshHypervisor {
    async fn define_domain(&self, descriptor: &Path) -> Result<(), StepError> {
        let command = HostCommand::new("virsh")
            .arg("define")
            .arg(descriptor.to_string_lossy());
        run_checked(self.runner.as_ref(), &command).await?;
        info!(descriptor = %descriptor.display(), "Domain defined");
        Ok(())
    }

    async fn start_domain(&self, vm_name: &str) -> Result<(), StepError> {
        let command = HostCommand::new("virsh").arg("start").arg(vm_name);
        run_checked(self.runner.as_ref(), &command).await?;
        info!(vm_name = %vm_name, "Domain started");
        Ok(())
    }
}
