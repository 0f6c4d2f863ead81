//! Input/output path resolution and the optional TOML config.
//!
//! Paths follow the MetaQA layout under `data_dir` and `embeddings_dir`. A
//! TOML file with a `[paths]` table can point any of them elsewhere; the
//! directory flags on the command line take priority over it.

use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const DEFAULT_DATA_DIR: &str = "MetaQA";
pub const DEFAULT_EMBEDDINGS_DIR: &str = ".";
pub const DEFAULT_CHECKPOINT_DIR: &str = "checkpoints/MetaQA";
pub const DEFAULT_RESULTS_CSV: &str = "final_results.csv";

/// Top-level structure of the config file.
#[derive(Debug, Default, Deserialize)]
pub struct HarnessToml {
    #[serde(default)]
    pub paths: PathOverrides,
}

/// Optional per-file overrides. Unset entries use the MetaQA layout.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathOverrides {
    pub data_dir: Option<PathBuf>,
    pub embeddings_dir: Option<PathBuf>,
    pub checkpoint_dir: Option<PathBuf>,
    pub results_csv: Option<PathBuf>,
    pub train: Option<PathBuf>,
    pub valid: Option<PathBuf>,
    pub test: Option<PathBuf>,
    pub entity_dict: Option<PathBuf>,
    pub relation_dict: Option<PathBuf>,
    pub entity_embeddings: Option<PathBuf>,
    pub relation_embeddings: Option<PathBuf>,
}

/// Directory flags given on the command line.
#[derive(Debug, Default, Clone)]
pub struct PathFlags {
    pub data_dir: Option<PathBuf>,
    pub embeddings_dir: Option<PathBuf>,
    pub checkpoint_dir: Option<PathBuf>,
    pub results_csv: Option<PathBuf>,
}

/// Every file a run reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub train: PathBuf,
    pub valid: PathBuf,
    pub test: PathBuf,
    pub entity_dict: PathBuf,
    pub relation_dict: PathBuf,
    pub entity_embeddings: PathBuf,
    pub relation_embeddings: PathBuf,
    /// Core tensor of bilinear models; logged if present, never read.
    pub transform_matrix: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub results_csv: PathBuf,
}

/// Load and deserialize a [`HarnessToml`].
pub fn load_config_toml(path: &Path) -> anyhow::Result<HarnessToml> {
    let contents = std::fs::read_to_string(path)?;
    let config: HarnessToml = toml::from_str(&contents)?;
    tracing::info!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Resolve all paths for a run.
///
/// Priority chain per directory: built-in default < TOML `[paths]` < CLI flag.
/// Per-file TOML overrides replace the derived file path entirely.
pub fn resolve_paths(
    overrides: &PathOverrides,
    flags: &PathFlags,
    hops: usize,
    kg_type: &str,
) -> DataPaths {
    let pick = |cli: &Option<PathBuf>, toml: &Option<PathBuf>, default: &str| {
        cli.clone()
            .or_else(|| toml.clone())
            .unwrap_or_else(|| PathBuf::from(default))
    };
    let data_dir = pick(&flags.data_dir, &overrides.data_dir, DEFAULT_DATA_DIR);
    let embeddings_dir = pick(
        &flags.embeddings_dir,
        &overrides.embeddings_dir,
        DEFAULT_EMBEDDINGS_DIR,
    );
    let file = |over: &Option<PathBuf>, derived: PathBuf| over.clone().unwrap_or(derived);

    let kg_suffix = if kg_type == "half" { "_half" } else { "" };
    DataPaths {
        train: file(
            &overrides.train,
            data_dir.join(format!("qa_train_{hops}hop{kg_suffix}.txt")),
        ),
        valid: file(&overrides.valid, data_dir.join(format!("qa_dev_{hops}hop.txt"))),
        test: file(&overrides.test, data_dir.join(format!("qa_test_{hops}hop.txt"))),
        entity_dict: file(&overrides.entity_dict, data_dir.join("raw/entities.dict")),
        relation_dict: file(&overrides.relation_dict, data_dir.join("raw/relations.dict")),
        entity_embeddings: file(&overrides.entity_embeddings, embeddings_dir.join("E.npy")),
        relation_embeddings: file(&overrides.relation_embeddings, embeddings_dir.join("R.npy")),
        transform_matrix: embeddings_dir.join("W.npy"),
        checkpoint_dir: pick(
            &flags.checkpoint_dir,
            &overrides.checkpoint_dir,
            DEFAULT_CHECKPOINT_DIR,
        ),
        results_csv: pick(&flags.results_csv, &overrides.results_csv, DEFAULT_RESULTS_CSV),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let paths = resolve_paths(&PathOverrides::default(), &PathFlags::default(), 2, "half");
        assert_eq!(paths.train, PathBuf::from("MetaQA/qa_train_2hop_half.txt"));
        assert_eq!(paths.valid, PathBuf::from("MetaQA/qa_dev_2hop.txt"));
        assert_eq!(paths.test, PathBuf::from("MetaQA/qa_test_2hop.txt"));
        assert_eq!(paths.entity_dict, PathBuf::from("MetaQA/raw/entities.dict"));
        assert_eq!(paths.relation_dict, PathBuf::from("MetaQA/raw/relations.dict"));
        assert_eq!(paths.entity_embeddings, PathBuf::from("./E.npy"));
        assert_eq!(paths.checkpoint_dir, PathBuf::from(DEFAULT_CHECKPOINT_DIR));
        assert_eq!(paths.results_csv, PathBuf::from("final_results.csv"));
    }

    #[test]
    fn test_full_kg_has_no_suffix() {
        let paths = resolve_paths(&PathOverrides::default(), &PathFlags::default(), 1, "full");
        assert_eq!(paths.train, PathBuf::from("MetaQA/qa_train_1hop.txt"));
    }

    #[test]
    fn test_deserialize_paths_table() {
        let toml_str = r#"
[paths]
data_dir = "/data/metaqa"
train = "/tmp/train.txt"
"#;
        let config: HarnessToml = toml::from_str(toml_str).unwrap();
        let paths = resolve_paths(&config.paths, &PathFlags::default(), 3, "full");
        assert_eq!(paths.train, PathBuf::from("/tmp/train.txt"));
        assert_eq!(paths.test, PathBuf::from("/data/metaqa/qa_test_3hop.txt"));
    }

    #[test]
    fn test_missing_paths_table() {
        let config: HarnessToml = toml::from_str("").unwrap();
        assert!(config.paths.data_dir.is_none());
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(toml::from_str::<HarnessToml>("[paths]\ntrian = \"x\"\n").is_err());
    }

    #[test]
    fn test_cli_override_priority() {
        let overrides = PathOverrides {
            data_dir: Some(PathBuf::from("from_toml")),
            checkpoint_dir: Some(PathBuf::from("toml_ckpt")),
            ..Default::default()
        };
        let flags = PathFlags {
            data_dir: Some(PathBuf::from("from_cli")),
            ..Default::default()
        };
        let paths = resolve_paths(&overrides, &flags, 1, "full");
        assert_eq!(paths.valid, PathBuf::from("from_cli/qa_dev_1hop.txt"));
        assert_eq!(paths.checkpoint_dir, PathBuf::from("toml_ckpt"));
    }
}
