//! `sta init`: record the trunk in repo config.

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::errors::StackError;
use crate::events::{Event, EventSink};
use crate::git_gateway::GitGateway;

pub async fn run(sink: Arc<dyn EventSink>, trunk: Option<String>) -> Result<()> {
    let gateway = GitGateway::open()?;

    let trunk = match trunk {
        Some(trunk) => {
            if !gateway.branch_exists(&trunk)? {
                return Err(StackError::User(format!("branch '{}' does not exist", trunk)).into());
            }
            trunk
        }
        None => {
            // Let the engine's inference decide, then persist the answer
            let engine = super::load_engine(sink.clone()).await?;
            engine.trunk().to_string()
        }
    };

    let config = Config::load(gateway.workdir())?;
    let path = Config::save_repo_layer(gateway.workdir(), &trunk, &config.remote)?;

    sink.emit(&Event::Notice {
        message: format!("trunk set to '{}' ({})", trunk, path.display()),
    });
    Ok(())
}
