//! Entity and relation dictionaries bound to embedding rows.
//!
//! A dictionary file has one `id<TAB>name` (or `name<TAB>id`) pair per line.
//! Each well-formed line binds `name` to row `id` of the embedding matrix.
//! Malformed lines are logged and skipped so that a handful of bad rows in a
//! large dictionary do not abort a run.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::embeddings::EmbeddingMatrix;
use crate::types::MetaQaError;

/// Column order of a dictionary file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DictLayout {
    /// `id<TAB>name`
    #[default]
    IdName,
    /// `name<TAB>id`
    NameId,
}

impl DictLayout {
    /// Split a trimmed line into `(id, name)`.
    fn parse<'a>(&self, line: &'a str) -> Result<(usize, &'a str), String> {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() != 2 {
            return Err(format!("expected 2 tab-separated columns, found {}", cols.len()));
        }
        let (id_col, name_col) = match self {
            DictLayout::IdName => (cols[0], cols[1]),
            DictLayout::NameId => (cols[1], cols[0]),
        };
        let id = id_col
            .trim()
            .parse::<usize>()
            .map_err(|e| format!("invalid id {id_col:?}: {e}"))?;
        let name = name_col.trim();
        if name.is_empty() {
            return Err("empty name".to_string());
        }
        Ok((id, name))
    }
}

impl std::str::FromStr for DictLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id-name" => Ok(DictLayout::IdName),
            "name-id" => Ok(DictLayout::NameId),
            other => Err(format!(
                "unknown dictionary layout {other:?} (expected id-name or name-id)"
            )),
        }
    }
}

impl std::fmt::Display for DictLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DictLayout::IdName => write!(f, "id-name"),
            DictLayout::NameId => write!(f, "name-id"),
        }
    }
}

/// Counters from building an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Lines that bound a name to an embedding row.
    pub bound: usize,
    /// Malformed lines that were skipped.
    pub skipped: usize,
    /// Well-formed lines whose name was already bound (last write wins).
    pub overwritten: usize,
}

/// Name → embedding mapping, in first-seen dictionary order.
#[derive(Debug, Clone)]
pub struct EntityIndex {
    names: Vec<String>,
    embeddings: HashMap<String, Vec<f32>>,
    dim: usize,
    stats: IndexStats,
}

/// Contiguous integer ids for an [`EntityIndex`].
///
/// Row `i` of `matrix` is the embedding of `id_to_entity[i]`.
#[derive(Debug, Clone)]
pub struct PreparedEntities {
    pub entity_to_id: HashMap<String, usize>,
    pub id_to_entity: Vec<String>,
    pub matrix: EmbeddingMatrix,
}

impl PreparedEntities {
    pub fn len(&self) -> usize {
        self.id_to_entity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_entity.is_empty()
    }

    pub fn id(&self, name: &str) -> Option<usize> {
        self.entity_to_id.get(name).copied()
    }

    pub fn name(&self, id: usize) -> Option<&str> {
        self.id_to_entity.get(id).map(String::as_str)
    }
}

impl EntityIndex {
    /// Read a dictionary file and bind its names to rows of `matrix`.
    pub fn from_dict_file(
        path: &Path,
        matrix: &EmbeddingMatrix,
        layout: DictLayout,
    ) -> Result<Self, MetaQaError> {
        let file = File::open(path)?;
        let index = Self::from_dict_reader(BufReader::new(file), matrix, layout)?;
        tracing::info!(
            path = %path.display(),
            bound = index.stats.bound,
            skipped = index.stats.skipped,
            entries = index.len(),
            "Loaded dictionary"
        );
        Ok(index)
    }

    /// Build an index from any line-oriented reader.
    ///
    /// Only IO errors fail; malformed lines and ids outside the matrix are
    /// skipped with a warning and counted in [`IndexStats::skipped`].
    pub fn from_dict_reader<R: BufRead>(
        reader: R,
        matrix: &EmbeddingMatrix,
        layout: DictLayout,
    ) -> Result<Self, MetaQaError> {
        let mut index = Self {
            names: Vec::new(),
            embeddings: HashMap::new(),
            dim: matrix.dim(),
            stats: IndexStats::default(),
        };

        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let parsed = layout.parse(line).and_then(|(id, name)| {
                matrix
                    .row(id)
                    .map(|row| (name, row))
                    .ok_or_else(|| format!("id {id} out of range for {} rows", matrix.rows()))
            });
            match parsed {
                Ok((name, row)) => index.bind(name, row),
                Err(reason) => {
                    index.stats.skipped += 1;
                    tracing::warn!(
                        line = lineno + 1,
                        %reason,
                        "Skipping malformed dictionary line"
                    );
                }
            }
        }

        Ok(index)
    }

    fn bind(&mut self, name: &str, row: &[f32]) {
        if self.embeddings.insert(name.to_string(), row.to_vec()).is_some() {
            self.stats.overwritten += 1;
        } else {
            self.names.push(name.to_string());
        }
        self.stats.bound += 1;
    }

    pub fn embedding(&self, name: &str) -> Option<&[f32]> {
        self.embeddings.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.embeddings.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Embedding width (the source matrix's column count).
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    /// Names in first-seen order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Assign contiguous ids in first-seen order and stack the embeddings.
    pub fn prepare(&self) -> PreparedEntities {
        let mut entity_to_id = HashMap::with_capacity(self.names.len());
        let mut data = Vec::with_capacity(self.names.len() * self.dim);
        for (id, name) in self.names.iter().enumerate() {
            entity_to_id.insert(name.clone(), id);
            data.extend_from_slice(&self.embeddings[name]);
        }
        let matrix = EmbeddingMatrix::from_parts(self.names.len(), self.dim, data);
        PreparedEntities {
            entity_to_id,
            id_to_entity: self.names.clone(),
            matrix,
        }
    }
}
