//! Per-dispatcher state threaded through every handler call.

use std::collections::HashMap;

/// Would-be properties of a file after a suppressed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowFile {
    pub hash: String,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

/// Effects that rehearsal suppressed, so later queries see the would-be state.
#[derive(Debug, Default)]
pub struct Overlay {
    packages: HashMap<String, bool>,
    files: HashMap<String, Option<ShadowFile>>,
}

impl Overlay {
    /// Rehearsed install state of a package, if rehearsal touched it.
    pub fn package(&self, name: &str) -> Option<bool> {
        self.packages.get(name).copied()
    }

    pub fn set_package(&mut self, name: &str, installed: bool) {
        self.packages.insert(name.to_string(), installed);
    }

    /// Rehearsed state of a file: `Some(None)` means it would be deleted.
    pub fn file(&self, path: &str) -> Option<Option<&ShadowFile>> {
        self.files.get(path).map(Option::as_ref)
    }

    pub fn set_file(&mut self, path: &str, file: ShadowFile) {
        self.files.insert(path.to_string(), Some(file));
    }

    pub fn delete_file(&mut self, path: &str) {
        self.files.insert(path.to_string(), None);
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty() && self.files.is_empty()
    }
}

/// State that lives exactly as long as one dispatcher process.
#[derive(Debug, Default)]
pub struct DispatcherState {
    /// Sticky once set: mutations are checked but not performed
    pub rehearsal: bool,
    /// The package index is refreshed at most once per dispatcher
    pub index_refreshed: bool,
    /// Suppressed effects recorded during rehearsal
    pub overlay: Overlay,
}

impl DispatcherState {
    pub fn new() -> Self {
        Self::default()
    }
}
