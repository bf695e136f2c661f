use std::path::Path;

use crate::config::{AppConfig, LoadedConfig};

use super::output::OutputFormat;

pub struct CliContext {
    loaded: LoadedConfig,
    output: OutputFormat,
}

impl CliContext {
    pub fn new(loaded: LoadedConfig, output: OutputFormat) -> Self {
        Self { loaded, output }
    }

    pub fn config(&self) -> &AppConfig {
        &self.loaded.config
    }

    pub fn config_source(&self) -> Option<&Path> {
        self.loaded.source.as_deref()
    }

    pub fn output(&self) -> OutputFormat {
        self.output
    }
}
