use gru_glue_host::{Glue, ModuleSource};

use crate::project::ProjectContext;
use crate::report::RunSummary;

pub struct RunOptions {
    pub module: String,
    pub frames: u32,
    pub frame_ms: f64,
    pub allow_unbound: bool,
    pub json: bool,
}

pub async fn run(opts: RunOptions, ctx: ProjectContext) -> anyhow::Result<()> {
    let mut config = ctx.config.clone();
    config.imports.allow_unbound |= opts.allow_unbound;
    log::info!("using config from {}", ctx.describe());

    let mut glue = Glue::new(config)?;
    let runtime = glue.init(ModuleSource::parse(&opts.module)).await?;
    for (import, why) in runtime.plan().unbound() {
        log::warn!("unbound import {} {}: {why}", import.name, import.signature());
    }
    runtime.run()?;
    let pump = runtime.run_frames(opts.frames, opts.frame_ms);
    if pump.failures > 0 {
        log::warn!("{} callback(s) failed", pump.failures);
    }

    let Some(runtime) = glue.into_runtime() else {
        anyhow::bail!("guest was not initialised");
    };
    let summary = RunSummary {
        module: opts.module,
        config: ctx.describe(),
        pump,
        stats: runtime.shutdown()?,
    };
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for line in summary.lines() {
            println!("{line}");
        }
    }
    Ok(())
}
