//! Shared data model for the serving worker: the entities of §3.1 and the
//! canonical binary encoding of a replication log entry (§4.2).
use std::collections::BTreeSet;

use anyhow::Context;
use errors::ErrorMetadata;
use serde::{
    de::Error as _,
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};

/// A metadata scalar. Nested objects are rejected at encode time (no
/// `Object` variant exists to construct).
///
/// `Serialize`/`Deserialize` are hand-written rather than derived because
/// this type needs two different wire shapes depending on the format: JSON
/// (`/insert`, `/query`) documents a bare scalar (`2020`, `"x"`, `true`,
/// `null`, §4.1/§8 scenario 3), but `UpdateOp`'s `bincode` log-entry
/// encoding (§4.2) is not self-describing and cannot drive an untagged
/// deserialize — it needs the ordinary tagged-enum shape. Both shapes
/// delegate to a private derive underneath; only the choice between them is
/// hand-written, keyed on `Serializer`/`Deserializer::is_human_readable`.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    /// `lt`/`gt` constraints require numeric values; `eq` works on any
    /// scalar via structural equality.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
enum ScalarTagged {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ScalarUntagged {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<Scalar> for ScalarTagged {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::Null => ScalarTagged::Null,
            Scalar::Bool(b) => ScalarTagged::Bool(b),
            Scalar::Int(i) => ScalarTagged::Int(i),
            Scalar::Float(f) => ScalarTagged::Float(f),
            Scalar::Str(s) => ScalarTagged::Str(s),
        }
    }
}

impl From<ScalarTagged> for Scalar {
    fn from(value: ScalarTagged) -> Self {
        match value {
            ScalarTagged::Null => Scalar::Null,
            ScalarTagged::Bool(b) => Scalar::Bool(b),
            ScalarTagged::Int(i) => Scalar::Int(i),
            ScalarTagged::Float(f) => Scalar::Float(f),
            ScalarTagged::Str(s) => Scalar::Str(s),
        }
    }
}

impl From<Scalar> for ScalarUntagged {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::Null => ScalarUntagged::Null,
            Scalar::Bool(b) => ScalarUntagged::Bool(b),
            Scalar::Int(i) => ScalarUntagged::Int(i),
            Scalar::Float(f) => ScalarUntagged::Float(f),
            Scalar::Str(s) => ScalarUntagged::Str(s),
        }
    }
}

impl From<ScalarUntagged> for Scalar {
    fn from(value: ScalarUntagged) -> Self {
        match value {
            ScalarUntagged::Null => Scalar::Null,
            ScalarUntagged::Bool(b) => Scalar::Bool(b),
            ScalarUntagged::Int(i) => Scalar::Int(i),
            ScalarUntagged::Float(f) => Scalar::Float(f),
            ScalarUntagged::Str(s) => Scalar::Str(s),
        }
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            ScalarUntagged::from(self.clone()).serialize(serializer)
        } else {
            ScalarTagged::from(self.clone()).serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            ScalarUntagged::deserialize(deserializer).map(Scalar::from)
        } else {
            ScalarTagged::deserialize(deserializer).map(Scalar::from)
        }
    }
}

/// A metadata value: `scalar | array<scalar>` (§3.2 invariant 3 in
/// SPEC_FULL.md / §9 Design Notes). Same human-readable/binary split as
/// `Scalar`, for the same reason.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Scalar(Scalar),
    Array(Vec<Scalar>),
}

#[derive(Serialize, Deserialize)]
enum MetadataValueTagged {
    Scalar(Scalar),
    Array(Vec<Scalar>),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum MetadataValueUntagged {
    Scalar(Scalar),
    Array(Vec<Scalar>),
}

impl From<MetadataValue> for MetadataValueTagged {
    fn from(value: MetadataValue) -> Self {
        match value {
            MetadataValue::Scalar(s) => MetadataValueTagged::Scalar(s),
            MetadataValue::Array(a) => MetadataValueTagged::Array(a),
        }
    }
}

impl From<MetadataValueTagged> for MetadataValue {
    fn from(value: MetadataValueTagged) -> Self {
        match value {
            MetadataValueTagged::Scalar(s) => MetadataValue::Scalar(s),
            MetadataValueTagged::Array(a) => MetadataValue::Array(a),
        }
    }
}

impl From<MetadataValue> for MetadataValueUntagged {
    fn from(value: MetadataValue) -> Self {
        match value {
            MetadataValue::Scalar(s) => MetadataValueUntagged::Scalar(s),
            MetadataValue::Array(a) => MetadataValueUntagged::Array(a),
        }
    }
}

impl From<MetadataValueUntagged> for MetadataValue {
    fn from(value: MetadataValueUntagged) -> Self {
        match value {
            MetadataValueUntagged::Scalar(s) => MetadataValue::Scalar(s),
            MetadataValueUntagged::Array(a) => MetadataValue::Array(a),
        }
    }
}

impl Serialize for MetadataValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            MetadataValueUntagged::from(self.clone()).serialize(serializer)
        } else {
            MetadataValueTagged::from(self.clone()).serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for MetadataValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            MetadataValueUntagged::deserialize(deserializer).map(MetadataValue::from)
        } else {
            MetadataValueTagged::deserialize(deserializer).map(MetadataValue::from)
        }
    }
}

pub type Metadata = std::collections::BTreeMap<String, MetadataValue>;

/// A retrievable text unit. Produced only by queries; never mutated
/// directly by callers (§3.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: u64,
    pub text: String,
    pub document: String,
    pub doc_id: String,
    pub score: f32,
    pub metadata: Metadata,
}

/// A logical source document tracked by the index (§3.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub document: String,
    pub doc_id: String,
    pub doc_version: u32,
}

/// A comparison constraint on a metadata field (§4.1). Wire form is the
/// lowercase op name (`"eq"`, `"lt"`, `"gt"`); `Unknown` absorbs any other
/// string via `#[serde(other)]` so a bad op fails `Constraint::validate`
/// with a distinguishable error instead of a generic deserialize error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintOp {
    Eq,
    Lt,
    Gt,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub op: ConstraintOp,
    pub value: Scalar,
}

impl Constraint {
    /// Rejects an op string that didn't match one of the known variants
    /// (§4.5 error mapping: "unknown constraint op → 422").
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.op == ConstraintOp::Unknown {
            anyhow::bail!(ErrorMetadata::bad_request(
                "UnknownConstraintOp",
                "constraint op must be one of: eq, lt, gt",
            ));
        }
        Ok(())
    }
}

pub type Constraints = std::collections::BTreeMap<String, Constraint>;

/// Validates every constraint in a query's constraint map (§4.1, §4.5).
pub fn validate_constraints(constraints: &Constraints) -> anyhow::Result<()> {
    for constraint in constraints.values() {
        constraint.validate()?;
    }
    Ok(())
}

/// One mutating request, tagged by variant. This is the unit that gets
/// encoded into the replication log (§4.2) and applied by the Index Facade
/// (§4.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpdateOp {
    Insert {
        document: String,
        doc_id: String,
        chunks: Vec<String>,
        metadata: Vec<Metadata>,
        version: Option<u32>,
    },
    Delete {
        doc_id: String,
        keep_latest_version: bool,
    },
    Upvote {
        query: String,
        label: u64,
    },
    Associate {
        source: String,
        target: String,
        strength: u32,
    },
}

impl UpdateOp {
    pub fn default_associate_strength() -> u32 {
        4
    }

    /// Pre-validate against the §4.1 contracts *before* submission to the
    /// RSM, so malformed requests never pay for a consensus round trip
    /// (§4.3 writer contract step 1).
    pub fn validate(&self) -> anyhow::Result<()> {
        match self {
            UpdateOp::Insert {
                chunks, metadata, ..
            } => {
                if chunks.is_empty() {
                    anyhow::bail!(ErrorMetadata::bad_request(
                        "EmptyChunks",
                        "Insert requires at least one chunk",
                    ));
                }
                if !(metadata.is_empty() || metadata.len() == chunks.len()) {
                    anyhow::bail!(ErrorMetadata::bad_request(
                        "MetadataLengthMismatch",
                        format!(
                            "metadata has {} entries but there are {} chunks",
                            metadata.len(),
                            chunks.len()
                        ),
                    ));
                }
                Ok(())
            },
            UpdateOp::Delete { .. } => Ok(()),
            UpdateOp::Upvote { .. } => Ok(()),
            UpdateOp::Associate { strength, .. } => {
                if *strength < 1 {
                    anyhow::bail!(ErrorMetadata::bad_request(
                        "InvalidStrength",
                        "Associate strength must be >= 1",
                    ));
                }
                Ok(())
            },
        }
    }
}

/// `{query, answer, reference_ids}`, stored inside the response-cache index
/// as a chunk whose text is the query (§3.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub query: String,
    pub answer: String,
    pub reference_ids: BTreeSet<u64>,
}

/// `(caller_token, model_id) -> permission`, cached with a TTL <= 60s by
/// the Authorization Gate (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPermission {
    pub read: bool,
    pub write: bool,
}

/// The schema version byte prefixed to every encoded log entry. Bump this
/// and add a match arm in `decode` whenever `UpdateOp`'s shape changes in a
/// way that isn't `serde`-forward-compatible.
const SCHEMA_VERSION: u8 = 1;

/// Canonical binary encoding of an `UpdateOp` (§4.2). The same bytes decode
/// identically on every replica; unknown schema versions fail `BadRequest`
/// rather than silently misinterpreting the payload.
pub fn encode(op: &UpdateOp) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    buf.push(SCHEMA_VERSION);
    bincode::serialize_into(&mut buf, op).context("failed to encode UpdateOp")?;
    Ok(buf)
}

pub fn decode(bytes: &[u8]) -> anyhow::Result<UpdateOp> {
    let (version, rest) = bytes.split_first().ok_or_else(|| {
        anyhow::anyhow!(ErrorMetadata::bad_request(
            "EmptyLogEntry",
            "log entry has no schema version byte",
        ))
    })?;
    if *version != SCHEMA_VERSION {
        anyhow::bail!(ErrorMetadata::bad_request(
            "UnknownSchemaVersion",
            format!("log entry has unsupported schema version {version}"),
        ));
    }
    bincode::deserialize(rest).map_err(|e| {
        anyhow::anyhow!(ErrorMetadata::bad_request(
            "UndecodableLogEntry",
            format!("failed to decode log entry: {e}"),
        ))
    })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn arb_scalar() -> impl Strategy<Value = Scalar> {
        prop_oneof![
            Just(Scalar::Null),
            any::<bool>().prop_map(Scalar::Bool),
            any::<i64>().prop_map(Scalar::Int),
            any::<f64>().prop_map(Scalar::Float),
            ".{0,16}".prop_map(Scalar::Str),
        ]
    }

    fn arb_metadata_value() -> impl Strategy<Value = MetadataValue> {
        prop_oneof![
            arb_scalar().prop_map(MetadataValue::Scalar),
            proptest::collection::vec(arb_scalar(), 0..4).prop_map(MetadataValue::Array),
        ]
    }

    fn arb_metadata() -> impl Strategy<Value = Metadata> {
        proptest::collection::btree_map(".{1,8}", arb_metadata_value(), 0..4)
    }

    fn arb_update_op() -> impl Strategy<Value = UpdateOp> {
        prop_oneof![
            (
                ".{1,8}",
                ".{1,8}",
                proptest::collection::vec(".{1,8}", 1..4),
                proptest::option::of(any::<u32>()),
            )
                .prop_flat_map(|(document, doc_id, chunks, version)| {
                    let n = chunks.len();
                    proptest::collection::vec(arb_metadata(), 0..=n).prop_map(move |metadata| {
                        // Either empty metadata or exactly one entry per chunk,
                        // matching the Insert invariant.
                        let metadata = if metadata.is_empty() {
                            metadata
                        } else {
                            (0..n).map(|i| metadata[i % metadata.len()].clone()).collect()
                        };
                        UpdateOp::Insert {
                            document: document.clone(),
                            doc_id: doc_id.clone(),
                            chunks: chunks.clone(),
                            metadata,
                            version,
                        }
                    })
                }),
            (".{1,8}", any::<bool>()).prop_map(|(doc_id, keep_latest_version)| {
                UpdateOp::Delete {
                    doc_id,
                    keep_latest_version,
                }
            }),
            (".{1,8}", any::<u64>())
                .prop_map(|(query, label)| UpdateOp::Upvote { query, label }),
            (".{1,8}", ".{1,8}", 1u32..10)
                .prop_map(|(source, target, strength)| UpdateOp::Associate {
                    source,
                    target,
                    strength,
                }),
        ]
    }

    proptest! {
        #[test]
        fn encode_decode_round_trips(op in arb_update_op()) {
            let bytes = encode(&op).unwrap();
            let decoded = decode(&bytes).unwrap();
            prop_assert_eq!(op, decoded);
        }
    }

    #[test]
    fn unknown_schema_version_is_bad_request() {
        let mut bytes = encode(&UpdateOp::Delete {
            doc_id: "d1".into(),
            keep_latest_version: false,
        })
        .unwrap();
        bytes[0] = 255;
        let err = decode(&bytes).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ErrorMetadata>().unwrap().code,
            errors::ErrorCode::BadRequest
        );
    }

    #[test]
    fn insert_requires_chunks() {
        let op = UpdateOp::Insert {
            document: "a.pdf".into(),
            doc_id: "d1".into(),
            chunks: vec![],
            metadata: vec![],
            version: None,
        };
        assert!(op.validate().is_err());
    }

    #[test]
    fn insert_metadata_length_must_match_or_be_empty() {
        let op = UpdateOp::Insert {
            document: "a.pdf".into(),
            doc_id: "d1".into(),
            chunks: vec!["a".into(), "b".into()],
            metadata: vec![Metadata::new()],
            version: None,
        };
        assert!(op.validate().is_err());
    }
}
