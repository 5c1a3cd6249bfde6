//! Human and JSON renderings of import plans and run results.

use gru_glue_host::imports::Binding;
use gru_glue_host::{ImportPlan, PumpReport, Resolution, RuntimeStats};
use serde::Serialize;
use serde_json::json;

pub fn plan_json(plan: &ImportPlan) -> serde_json::Value {
    let imports: Vec<_> = plan
        .imports
        .iter()
        .map(|import| {
            let (bound, reason) = match &import.resolution {
                Resolution::Bound(binding) => (Some(binding.name), None),
                Resolution::Unbound(why) => (None, Some(why.to_string())),
            };
            json!({
                "module": import.module,
                "name": import.name,
                "signature": import.signature(),
                "binding": bound,
                "unbound": reason,
            })
        })
        .collect();
    json!({
        "bound": plan.bound(),
        "total": plan.imports.len(),
        "imports": imports,
    })
}

/// One line per import, unbound ones marked with `!`.
pub fn plan_lines(plan: &ImportPlan) -> Vec<String> {
    let width = plan
        .imports
        .iter()
        .map(|i| i.name.len())
        .max()
        .unwrap_or(0);
    plan.imports
        .iter()
        .map(|import| match &import.resolution {
            Resolution::Bound(binding) => format!(
                "  {:<width$}  {} {}",
                import.name,
                binding.name,
                import.signature()
            ),
            Resolution::Unbound(why) => format!(
                "! {:<width$}  {} {why}",
                import.name,
                import.signature()
            ),
        })
        .collect()
}

pub fn binding_line(binding: &Binding) -> String {
    format!(
        "{:<48} {:<28} {}{}",
        binding.name,
        binding.symbol,
        binding.signature(),
        if binding.catch { "  catch" } else { "" }
    )
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub module: String,
    pub config: String,
    pub pump: PumpReport,
    pub stats: RuntimeStats,
}

impl RunSummary {
    pub fn lines(&self) -> Vec<String> {
        let pump = &self.pump;
        let stats = &self.stats;
        vec![
            format!("module      {}", self.module),
            format!("config      {}", self.config),
            format!("clock       {:.1} ms", stats.clock_ms),
            format!(
                "callbacks   {} timeout(s), {} request(s), {} sound(s), {} frame(s), {} failed",
                pump.timeouts, pump.requests, pump.sounds_ended, pump.frames, pump.failures
            ),
            format!(
                "imports     {} call(s), {} host fault(s)",
                stats.host.imports_called, stats.host.host_faults
            ),
            format!(
                "handles     {} live of {}",
                stats.live_handles, stats.heap_capacity
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gru_glue_host::imports::{resolve, PlannedImport, Ty};
    use gru_glue_host::HostConfig;

    fn planned(name: &str, params: &[Ty], results: &[Ty]) -> PlannedImport {
        let config = HostConfig::default();
        PlannedImport {
            module: "wbg".to_string(),
            name: name.to_string(),
            params: params.to_vec(),
            results: results.to_vec(),
            resolution: resolve(name, params, results, &config.imports),
            wrapper: None,
        }
    }

    fn plan() -> ImportPlan {
        ImportPlan {
            imports: vec![
                planned("__wbg_self_1b7a39e3a92c949c", &[], &[Ty::I32]),
                planned("__wbg_teleport_0123456789abcdef", &[Ty::I32], &[]),
            ],
        }
    }

    #[test]
    fn test_plan_json() {
        let value = plan_json(&plan());
        assert_eq!(value["bound"], 1);
        assert_eq!(value["total"], 2);
        assert_eq!(value["imports"][0]["binding"], "self");
        assert_eq!(value["imports"][1]["unbound"], "unknown symbol");
    }

    #[test]
    fn test_plan_lines_mark_unbound() {
        let lines = plan_lines(&plan());
        assert!(lines[0].starts_with("  __wbg_self_"));
        assert!(lines[1].starts_with("! __wbg_teleport_"));
        assert!(lines[1].ends_with("(i32) unknown symbol"));
    }
}
