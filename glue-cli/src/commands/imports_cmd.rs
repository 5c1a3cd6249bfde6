use gru_glue_host::{imports, ModuleSource};
use wasmtime::Engine;

use crate::project::ProjectContext;
use crate::report;

/// Print the import plan; fails when anything is left unbound.
pub async fn run(module: String, json: bool, ctx: ProjectContext) -> anyhow::Result<()> {
    let engine = Engine::default();
    let compiled = ModuleSource::parse(&module).compile(&engine).await?;
    let plan = imports::plan(&compiled, &ctx.config.imports);

    if json {
        println!("{}", serde_json::to_string_pretty(&report::plan_json(&plan))?);
    } else {
        for line in report::plan_lines(&plan) {
            println!("{line}");
        }
        println!("{} of {} import(s) bound", plan.bound(), plan.imports.len());
    }

    let unbound = plan.imports.len() - plan.bound();
    if unbound > 0 {
        anyhow::bail!("{unbound} import(s) of {module} have no adapter");
    }
    Ok(())
}
