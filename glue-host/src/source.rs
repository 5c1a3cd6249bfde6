//! Where a guest module comes from, for the asynchronous initialisation path.

use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use wasmtime::{Engine, Module};

const WASM_CONTENT_TYPE: &str = "application/wasm";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
    /// `file:`, `http:` or `https:`.
    Url(url::Url),
}

impl ModuleSource {
    /// Interpret a command-line argument: anything that parses as a URL with
    /// a supported scheme is a URL, everything else a path.
    pub fn parse(arg: &str) -> Self {
        match url::Url::parse(arg) {
            Ok(url) if matches!(url.scheme(), "file" | "http" | "https") => ModuleSource::Url(url),
            _ => ModuleSource::Path(PathBuf::from(arg)),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ModuleSource::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
            ModuleSource::Path(path) => path.display().to_string(),
            ModuleSource::Url(url) => url.to_string(),
        }
    }

    /// Compile on tokio's blocking pool. Local files are compiled in place;
    /// everything else is read into a buffer first.
    pub async fn compile(self, engine: &Engine) -> anyhow::Result<Module> {
        let engine = engine.clone();
        let what = self.describe();
        tokio::task::spawn_blocking(move || self.compile_blocking(&engine))
            .await
            .with_context(|| format!("compiling {what}"))?
    }

    pub fn compile_blocking(self, engine: &Engine) -> anyhow::Result<Module> {
        match self {
            ModuleSource::Bytes(bytes) => {
                Module::new(engine, &bytes).context("compiling module bytes")
            }
            ModuleSource::Path(path) => Module::from_file(engine, &path)
                .with_context(|| format!("compiling {}", path.display())),
            ModuleSource::Url(url) if url.scheme() == "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|()| anyhow::anyhow!("`{url}` is not a usable file URL"))?;
                ModuleSource::Path(path).compile_blocking(engine)
            }
            ModuleSource::Url(url) => {
                let bytes = download(&url)?;
                Module::new(engine, &bytes).with_context(|| format!("compiling {url}"))
            }
        }
    }
}

fn download(url: &url::Url) -> anyhow::Result<Vec<u8>> {
    let resp = ureq::get(url.as_str())
        .call()
        .with_context(|| format!("GET {url}"))?;
    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !content_type.starts_with(WASM_CONTENT_TYPE) {
        log::warn!(
            "{url} is served as `{content_type}`, not `{WASM_CONTENT_TYPE}`; compiling from a buffer"
        );
    }
    let mut bytes = Vec::new();
    resp.into_body()
        .into_reader()
        .read_to_end(&mut bytes)
        .with_context(|| format!("downloading {url}"))?;
    log::debug!("downloaded {} bytes from {url}", bytes.len());
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_MODULE: &str = "(module)";

    #[test]
    fn test_parse() {
        assert!(matches!(ModuleSource::parse("demo.wasm"), ModuleSource::Path(_)));
        assert!(matches!(ModuleSource::parse("https://example.org/demo.wasm"), ModuleSource::Url(_)));
        assert!(matches!(ModuleSource::parse("file:///tmp/demo.wasm"), ModuleSource::Url(_)));
        // A Windows drive letter parses as a URL scheme.
        assert!(matches!(ModuleSource::parse("c:demo.wasm"), ModuleSource::Path(_)));
    }

    #[tokio::test]
    async fn test_compile_from_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wat");
        std::fs::write(&path, EMPTY_MODULE).unwrap();
        let engine = Engine::default();
        let url = url::Url::from_file_path(&path).unwrap();
        let module = ModuleSource::Url(url).compile(&engine).await.unwrap();
        assert_eq!(module.imports().len(), 0);

        let missing = ModuleSource::Path(dir.path().join("nope.wasm"));
        assert!(missing.compile(&engine).await.is_err());
    }
}
