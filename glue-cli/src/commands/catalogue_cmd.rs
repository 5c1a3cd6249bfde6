use gru_glue_host::catalogue;

use crate::report;

pub fn run(filter: Option<String>) -> anyhow::Result<()> {
    let entries = matching(filter.as_deref());
    for binding in &entries {
        println!("{}", report::binding_line(binding));
    }
    println!("{} of {} entries", entries.len(), catalogue().len());
    Ok(())
}

fn matching(filter: Option<&str>) -> Vec<&'static gru_glue_host::imports::Binding> {
    catalogue()
        .iter()
        .filter(|b| filter.map_or(true, |f| b.name.contains(f) || b.symbol.contains(f)))
        .collect()
}
