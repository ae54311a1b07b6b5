//! Runtime configuration: GC trigger threshold, evaluation backend, and
//! the hot-fn list for bootstrap phase 2. Loadable from a TOML file, with
//! struct-literal defaults when absent.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// Direct Node interpretation. Fast startup, slower steady state.
    TreeWalk,
    /// Compile each top-level form and run it on the stack VM.
    Vm,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EnvConfig {
    /// Bytes allocated since the last sweep before a collection is due.
    pub gc_threshold_bytes: u64,
    pub backend: Backend,
    /// Core fns recompiled to bytecode in bootstrap phase 2. These are
    /// the higher-order fns whose callback-heavy inner loops pay the
    /// tree-walk bridge cost the most.
    pub hot_fns: Vec<String>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        EnvConfig {
            gc_threshold_bytes: 1 << 20,
            backend: Backend::TreeWalk,
            hot_fns: [
                "map", "take", "take-while", "drop", "drop-while", "concat", "mapcat", "comp",
                "reduce", "transduce", "reductions", "iterate", "range",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl EnvConfig {
    pub fn from_toml_str(src: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(src)
    }

    pub fn load(path: &std::path::Path) -> std::io::Result<Self> {
        let src = std::fs::read_to_string(path)?;
        Self::from_toml_str(&src).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let c = EnvConfig::default();
        assert_eq!(c.backend, Backend::TreeWalk);
        assert!(c.hot_fns.iter().any(|f| f == "map"));
        assert!(c.gc_threshold_bytes > 0);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let c = EnvConfig::from_toml_str("backend = \"vm\"").unwrap();
        assert_eq!(c.backend, Backend::Vm);
        assert!(!c.hot_fns.is_empty());
    }
}
