use clap::{Args, Subcommand};
use serde::Serialize;
use serde_json::Value;

use datacenter::config;
use datacenter::sigil::{self, Context, Interpolator};

use super::CmdResult;

#[derive(Args)]
pub struct SigilArgs {
    #[command(subcommand)]
    command: SigilCommand,
}

#[derive(Subcommand)]
enum SigilCommand {
    /// Resolve %[...] tokens in a template against a JSON context
    Render {
        /// Template text
        template: String,
        /// JSON context (supports @file and - for stdin)
        #[arg(long)]
        context: Option<String>,
        /// Re-resolution ceiling (defaults to interpolation.maxDepth)
        #[arg(long)]
        max_depth: Option<usize>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SigilOutput {
    command: String,
    rendered: String,
    max_depth: usize,
    unresolved: Vec<String>,
}

pub fn run(args: SigilArgs, global: &crate::commands::GlobalArgs) -> CmdResult<SigilOutput> {
    match args.command {
        SigilCommand::Render {
            template,
            context,
            max_depth,
        } => {
            let context: Value = match context {
                Some(spec) => {
                    let raw = config::read_json_spec_to_string(&spec)?;
                    serde_json::from_str(&raw).map_err(|e| {
                        datacenter::Error::validation_invalid_json(e, Some("sigil context".to_string()))
                    })?
                }
                None => Value::Object(serde_json::Map::new()),
            };

            let depth = match max_depth {
                Some(depth) => depth,
                None => {
                    let (_, engine) = global.engine()?;
                    engine.settings().interpolation.max_depth
                }
            };

            let interpolator = Interpolator::new(depth);
            let rendered = interpolator.resolve(&template, &Context::from_value(&context));
            let unresolved = sigil::tokens(&rendered);

            Ok((
                SigilOutput {
                    command: "sigil.render".to_string(),
                    rendered,
                    max_depth: interpolator.max_depth(),
                    unresolved,
                },
                0,
            ))
        }
    }
}
