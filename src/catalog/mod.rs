#![forbid(unsafe_code)]

//! Bucket schema model and the concurrent bucket catalog.
//!
//! A bucket maps field names to [`IndexSpec`]s describing how object fields
//! are projected into indexed columns. The catalog resolves bucket names to
//! schemas for every downstream consumer (filter compiler, object stages)
//! and caches resolved schemas for concurrent read access; schema changes
//! bump `schema_version` and invalidate the cache entry so subsequent
//! requests observe the new index map. In-flight requests keep the
//! `Arc<Bucket>` they resolved: one consistent index map per compiled query.

mod store;

pub use store::BucketCatalog;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, ShoalError};

/// Maximum length accepted for bucket and field identifiers.
pub const MAX_IDENT_LEN: usize = 63;

/// Base type of an indexed field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexType {
    /// UTF-8 string.
    String,
    /// Double-precision number.
    Number,
    /// Boolean.
    Boolean,
}

impl IndexType {
    /// SQL column affinity used for scalar projections of this type.
    pub fn column_type(self) -> &'static str {
        match self {
            IndexType::String => "TEXT",
            IndexType::Number => "REAL",
            IndexType::Boolean => "INTEGER",
        }
    }

    /// Whether the type admits `>=` / `<=` comparisons.
    pub fn is_ordered(self) -> bool {
        !matches!(self, IndexType::Boolean)
    }
}

/// Declared index for one object field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IndexSpec {
    /// Element type (of the array, for array-typed fields).
    pub base_type: IndexType,
    /// Whether the field holds a sequence of `base_type` values.
    pub is_array: bool,
    /// Whether projected values must be unique across the bucket.
    pub unique: bool,
}

impl IndexSpec {
    /// SQL column type for the projected column. Array fields are stored as
    /// canonical JSON text regardless of base type.
    pub fn column_type(self) -> &'static str {
        if self.is_array {
            "TEXT"
        } else {
            self.base_type.column_type()
        }
    }

    /// Renders the config spelling (`string`, `[number]`, ...).
    pub fn type_spelling(self) -> String {
        let base = match self.base_type {
            IndexType::String => "string",
            IndexType::Number => "number",
            IndexType::Boolean => "boolean",
        };
        if self.is_array {
            format!("[{base}]")
        } else {
            base.to_owned()
        }
    }

    fn parse_spelling(spelling: &str) -> Option<(IndexType, bool)> {
        let (inner, is_array) = match spelling.strip_prefix('[') {
            Some(rest) => (rest.strip_suffix(']')?, true),
            None => (spelling, false),
        };
        let base = match inner {
            "string" => IndexType::String,
            "number" => IndexType::Number,
            "boolean" => IndexType::Boolean,
            _ => return None,
        };
        Some((base, is_array))
    }
}

/// One entry of the client-supplied bucket configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Type spelling: `string`, `number`, `boolean`, or the bracketed array
    /// forms `[string]`, `[number]`, `[boolean]`.
    #[serde(rename = "type")]
    pub type_spelling: String,
    /// Whether the projected value must be unique across the bucket.
    #[serde(default)]
    pub unique: bool,
}

/// Client-supplied bucket configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Field name to index declaration.
    #[serde(default)]
    pub index: BTreeMap<String, IndexConfig>,
}

impl BucketConfig {
    fn validate(&self) -> Result<BTreeMap<String, IndexSpec>> {
        let mut index = BTreeMap::new();
        for (field, cfg) in &self.index {
            if !valid_ident(field) {
                return Err(ShoalError::InvalidBucketConfig {
                    reason: format!("invalid index field name '{field}'"),
                });
            }
            if is_reserved_field(field) {
                return Err(ShoalError::InvalidBucketConfig {
                    reason: format!("index field name '{field}' is reserved"),
                });
            }
            let Some((base_type, is_array)) = IndexSpec::parse_spelling(&cfg.type_spelling) else {
                return Err(ShoalError::InvalidBucketConfig {
                    reason: format!(
                        "field '{field}' has unsupported type '{}'",
                        cfg.type_spelling
                    ),
                });
            };
            if is_array && cfg.unique {
                return Err(ShoalError::InvalidBucketConfig {
                    reason: format!("array-typed field '{field}' cannot be unique"),
                });
            }
            index.insert(
                field.clone(),
                IndexSpec {
                    base_type,
                    is_array,
                    unique: cfg.unique,
                },
            );
        }
        Ok(index)
    }
}

/// Resolved bucket schema handed to the filter compiler and object stages.
#[derive(Clone, Debug)]
pub struct Bucket {
    /// Bucket name, unique and immutable.
    pub name: String,
    /// Index field declarations. Never mutated in place; a schema change
    /// produces a new `Bucket` value under a bumped version.
    pub index: BTreeMap<String, IndexSpec>,
    /// Monotonic schema version, bumped by `update_bucket`.
    pub schema_version: u32,
}

impl Bucket {
    /// Builds a bucket from a validated client configuration.
    pub fn from_config(name: &str, config: &BucketConfig, schema_version: u32) -> Result<Self> {
        if !valid_ident(name) {
            return Err(ShoalError::InvalidBucketConfig {
                reason: format!("invalid bucket name '{name}'"),
            });
        }
        Ok(Bucket {
            name: name.to_owned(),
            index: config.validate()?,
            schema_version,
        })
    }

    /// Renders the schema back into its configuration form.
    pub fn to_config(&self) -> BucketConfig {
        BucketConfig {
            index: self
                .index
                .iter()
                .map(|(field, spec)| {
                    (
                        field.clone(),
                        IndexConfig {
                            type_spelling: spec.type_spelling(),
                            unique: spec.unique,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Name of the SQL table holding this bucket's objects.
    pub fn table(&self) -> String {
        format!("obj_{}", self.name)
    }

    /// Name of the SQL table holding this bucket's tombstones.
    pub fn tombstone_table(&self) -> String {
        format!("obj_{}_tombstone", self.name)
    }
}

/// Strict allow-list for identifiers used unquoted in generated SQL:
/// a letter followed by letters, digits, or underscores.
pub fn valid_ident(s: &str) -> bool {
    if s.is_empty() || s.len() > MAX_IDENT_LEN {
        return false;
    }
    let mut chars = s.chars();
    let first = chars.next().unwrap_or('\0');
    first.is_ascii_alphabetic() && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// System column names that index fields may not shadow.
fn is_reserved_field(field: &str) -> bool {
    matches!(field, "_id" | "_key" | "_value" | "_etag" | "_mtime" | "_dtime")
}
