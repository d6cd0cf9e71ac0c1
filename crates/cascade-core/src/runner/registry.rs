use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::process::ProcessRunner;
use crate::{EngineError, Result};

use super::java::JavaRunner;
use super::node::NodeRunner;
use super::python::PythonRunner;
use super::LanguageRunner;

/// Holds every known language runner and selects by capability probe.
pub struct RunnerRegistry {
    runners: Vec<Arc<dyn LanguageRunner>>,
}

impl RunnerRegistry {
    /// Registry with the built-in stacks.
    pub fn with_defaults(process: Arc<ProcessRunner>) -> Self {
        let runners: Vec<Arc<dyn LanguageRunner>> = vec![
            Arc::new(JavaRunner::new(Arc::clone(&process))),
            Arc::new(NodeRunner::new(Arc::clone(&process))),
            Arc::new(PythonRunner::new(process)),
        ];
        Self::new(runners)
    }

    pub fn new(runners: Vec<Arc<dyn LanguageRunner>>) -> Self {
        Self { runners }
    }

    pub fn register(&mut self, runner: Arc<dyn LanguageRunner>) {
        self.runners.push(runner);
    }

    /// Select the highest-priority runner whose probe accepts the directory.
    ///
    /// Equal priorities resolve to the earliest registered runner.
    pub fn select(&self, dir: &Path) -> Result<Arc<dyn LanguageRunner>> {
        let mut best: Option<&Arc<dyn LanguageRunner>> = None;
        for runner in &self.runners {
            if !runner.can_handle(dir) {
                continue;
            }
            debug!(language = runner.language(), dir = %dir.display(), "runner probe matched");
            match best {
                Some(current) if current.priority() >= runner.priority() => {}
                _ => best = Some(runner),
            }
        }

        best.cloned().ok_or_else(|| {
            EngineError::NoRunner(format!(
                "no language runner matches project at '{}'; known: {}",
                dir.display(),
                self.known_languages().join(", ")
            ))
        })
    }

    pub fn known_languages(&self) -> Vec<&'static str> {
        self.runners.iter().map(|r| r.language()).collect()
    }
}
