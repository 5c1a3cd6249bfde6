use std::path::{Path, PathBuf};

use anyhow::Context;
use gru_glue_host::{HostConfig, CONFIG_FILE};

pub fn run(dir: &Path, force: bool) -> anyhow::Result<()> {
    let path = write_default(dir, force)?;
    println!("wrote {}", path.display());
    Ok(())
}

fn write_default(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    let path = dir.join(CONFIG_FILE);
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let text = HostConfig::default().to_toml_string()?;
    std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}
