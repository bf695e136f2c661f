use anyhow::Result;
use serde::Serialize;

use super::context::CliContext;
use super::output::{emit, OutputFormat};
use crate::config::AppConfig;

#[derive(Serialize)]
struct EffectiveConfig<'a> {
    source: Option<String>,
    config: &'a AppConfig,
}

pub fn cmd_config(ctx: &CliContext) -> Result<()> {
    let source = ctx.config_source().map(|p| p.display().to_string());
    match ctx.output() {
        OutputFormat::Human => {
            let yaml = serde_yaml::to_string(ctx.config())?;
            let header = match &source {
                Some(path) => format!("# loaded from {path}"),
                None => "# built-in defaults and environment".to_string(),
            };
            println!("{header}\n{}", yaml.trim_end());
            Ok(())
        }
        format => emit(
            format,
            &EffectiveConfig {
                source,
                config: ctx.config(),
            },
            String::new,
        ),
    }
}
