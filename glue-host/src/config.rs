use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// File name the CLI looks for when discovering a config.
pub const CONFIG_FILE: &str = "gruglue.toml";

/// Everything the headless host can be told about its environment.
///
/// Defaults describe the window the gru OpenGL demo expects: one `canvas`
/// element, WebGL 2 allowed, stereo audio at 44.1 kHz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub window: WindowConfig,
    pub canvases: Vec<CanvasConfig>,
    pub webgl: WebGlConfig,
    pub audio: AudioConfig,
    pub storage: StorageConfig,
    pub fetch: FetchConfig,
    pub closures: ClosureConfig,
    pub imports: ImportConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            canvases: vec![CanvasConfig::default()],
            webgl: WebGlConfig::default(),
            audio: AudioConfig::default(),
            storage: StorageConfig::default(),
            fetch: FetchConfig::default(),
            closures: ClosureConfig::default(),
            imports: ImportConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub inner_width: u32,
    pub inner_height: u32,
    pub device_pixel_ratio: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            inner_width: 1280,
            inner_height: 720,
            device_pixel_ratio: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    pub id: String,
    pub width: u32,
    pub height: u32,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            id: "canvas".to_string(),
            width: 300,
            height: 150,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebGlConfig {
    /// Highest context generation `getContext` hands out (1 or 2).
    pub max_version: u8,
}

impl Default for WebGlConfig {
    fn default() -> Self {
        Self { max_version: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: f32,
    pub max_channel_count: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100.0,
            max_channel_count: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file `localStorage` is loaded from and saved to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Maximum stored size, counted in UTF-16 code units of keys plus values.
    pub quota: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            file: None,
            quota: 5 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Relative request URLs and `file:` URLs resolve against this directory.
    pub base_dir: PathBuf,
    pub allow_network: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            allow_network: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClosureConfig {
    /// Destructor table slot used for wrappers without a manifest entry.
    pub default_destructor: u32,
    /// Manifest keyed by the wrapper number in `__wbindgen_closure_wrapper<N>`.
    pub wrappers: BTreeMap<String, WrapperConfig>,
}

impl Default for ClosureConfig {
    fn default() -> Self {
        Self {
            default_destructor: 47,
            wrappers: BTreeMap::new(),
        }
    }
}

impl ClosureConfig {
    pub fn wrapper(&self, id: u32) -> Option<&WrapperConfig> {
        self.wrappers.get(&id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrapperConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtor: Option<u32>,
    /// Full trampoline export name.
    pub invoke: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Full import name -> catalogue entry name, for symbols that are
    /// ambiguous on their own.
    pub overrides: BTreeMap<String, String>,
    /// Link unresolved imports as trapping stubs instead of failing.
    pub allow_unbound: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        let mut overrides = BTreeMap::new();
        // `new XMLHttpRequest()` and `new Object()` share a signature.
        overrides.insert(
            "__wbg_new_c62fcbf93be55037".to_string(),
            "XMLHttpRequest.new".to_string(),
        );
        overrides.insert(
            "__wbg_new_9fb8d994e1c0aaac".to_string(),
            "Object.new".to_string(),
        );
        Self {
            overrides,
            allow_unbound: false,
        }
    }
}

impl HostConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: HostConfig = toml::from_str(text).context("invalid host config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut config =
            Self::from_toml_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        if let Some(dir) = path.parent() {
            config.rebase(dir);
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("serializing host config")
    }

    /// Make relative paths relative to `dir` instead of the working directory.
    pub fn rebase(&mut self, dir: &Path) {
        if self.fetch.base_dir.is_relative() {
            self.fetch.base_dir = dir.join(&self.fetch.base_dir);
        }
        if let Some(file) = &self.storage.file {
            if file.is_relative() {
                self.storage.file = Some(dir.join(file));
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=2).contains(&self.webgl.max_version) {
            anyhow::bail!(
                "webgl.max_version must be 1 or 2, got {}",
                self.webgl.max_version
            );
        }
        if self.window.device_pixel_ratio <= 0.0 {
            anyhow::bail!("window.device_pixel_ratio must be positive");
        }
        for key in self.closures.wrappers.keys() {
            key.parse::<u32>()
                .with_context(|| format!("closure wrapper key `{key}` is not a number"))?;
        }
        let mut seen = std::collections::BTreeSet::new();
        for canvas in &self.canvases {
            if !seen.insert(canvas.id.as_str()) {
                anyhow::bail!("duplicate canvas id `{}`", canvas.id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip() {
        let config = HostConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(HostConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config = HostConfig::from_toml_str(
            r#"
            [webgl]
            max_version = 1

            [closures.wrappers.1001]
            dtor = 47
            invoke = "wasm_bindgen__convert__closures__invoke0_mut__h69024f99aea98324"
            "#,
        )
        .unwrap();
        assert_eq!(config.webgl.max_version, 1);
        assert_eq!(config.audio, AudioConfig::default());
        assert_eq!(config.closures.wrapper(1001).unwrap().dtor, Some(47));
        assert!(config.closures.wrapper(292).is_none());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(HostConfig::from_toml_str("[webgl]\nmax_version = 3\n").is_err());
        assert!(HostConfig::from_toml_str(
            "[closures.wrappers.abc]\ninvoke = \"x\"\n"
        )
        .is_err());
        assert!(HostConfig::from_toml_str(
            "[[canvases]]\nid = \"a\"\n[[canvases]]\nid = \"a\"\n"
        )
        .is_err());
    }

    #[test]
    fn test_load_rebases_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            "[fetch]\nbase_dir = \"assets\"\n[storage]\nfile = \"storage.json\"\n",
        )
        .unwrap();
        let config = HostConfig::load(&path).unwrap();
        assert_eq!(config.fetch.base_dir, dir.path().join("assets"));
        assert_eq!(config.storage.file, Some(dir.path().join("storage.json")));
    }
}
