//! YAML and Secret transcoding.
//!
//! Everything here is structural: documents are parsed, transformed and
//! re-emitted, never rewritten with text patterns. Output is deterministic
//! (fixed field order, sorted maps) so an unchanged object always renders
//! byte-identically, which diff-based "show if changed" UIs depend on.
use std::collections::BTreeMap;

use base64::{prelude::BASE64_STANDARD, Engine};
use serde::Serialize;

use crate::{
    error::{Error, Result},
    identity::ResourceIdentity,
    object::ManagedObject,
    resource::ClusterKind,
};

/// Render an object as canonical YAML.
///
/// Field order is apiVersion, kind, metadata, spec, status; maps are sorted.
/// Two calls on an unchanged object produce byte-identical output.
pub fn to_yaml<S: Serialize>(obj: &ManagedObject<S>) -> Result<String> {
    serde_yaml::to_string(obj).map_err(|e| Error::Validation(format!("cannot render yaml: {e}")))
}

/// Parse a YAML document and verify it addresses `expected`.
///
/// The document's kind, name and (for namespaced kinds) namespace must match
/// the target identity; renaming or re-kinding an object through a YAML edit
/// is rejected with [`Error::IdentityMismatch`]. A namespace omitted from
/// the document is taken from the identity rather than treated as a
/// mismatch, matching the usual `kubectl`-style ergonomics.
pub fn from_yaml<K: ClusterKind>(
    raw: &str,
    expected: &ResourceIdentity,
) -> Result<ManagedObject<K::Spec>> {
    expected.validate_for::<K>()?;
    let mut obj: ManagedObject<K::Spec> = serde_yaml::from_str(raw).map_err(Error::Parse)?;

    if obj.types.kind != expected.kind || obj.metadata.name != expected.name {
        return Err(Error::IdentityMismatch {
            expected: expected.to_string(),
            found: format!("{}/{}", obj.types.kind, obj.metadata.name),
        });
    }
    match (&obj.metadata.namespace, &expected.namespace) {
        (Some(doc_ns), Some(ns)) if doc_ns != ns => {
            return Err(Error::IdentityMismatch {
                expected: expected.to_string(),
                found: format!("{}/{}/{}", obj.types.kind, doc_ns, obj.metadata.name),
            });
        }
        (None, Some(ns)) => obj.metadata.namespace = Some(ns.clone()),
        (Some(doc_ns), None) => {
            return Err(Error::IdentityMismatch {
                expected: expected.to_string(),
                found: format!("{}/{}/{}", obj.types.kind, doc_ns, obj.metadata.name),
            });
        }
        _ => {}
    }
    K::validate_spec(&obj.spec)?;
    Ok(obj)
}

/// Parse a YAML document for `create`, where only the kind is known up front.
pub fn parse_manifest<K: ClusterKind>(raw: &str) -> Result<ManagedObject<K::Spec>> {
    let obj: ManagedObject<K::Spec> = serde_yaml::from_str(raw).map_err(Error::Parse)?;
    if obj.types.kind != K::KIND {
        return Err(Error::IdentityMismatch {
            expected: K::KIND.to_string(),
            found: obj.types.kind,
        });
    }
    if obj.metadata.name.is_empty() {
        return Err(Error::Validation("manifest lacks metadata.name".into()));
    }
    K::validate_spec(&obj.spec)?;
    Ok(obj)
}

/// Encode raw secret values to their base64 wire form.
pub fn encode_secret_data(data: &BTreeMap<String, Vec<u8>>) -> BTreeMap<String, String> {
    data.iter()
        .map(|(k, v)| (k.clone(), BASE64_STANDARD.encode(v)))
        .collect()
}

/// Decode base64 secret values back to raw bytes.
///
/// Values that decode to non-UTF-8 bytes are preserved as-is; no UTF-8
/// decoding is ever attempted here, so binary secrets survive the edit path
/// uncorrupted.
pub fn decode_secret_data(data: &BTreeMap<String, String>) -> Result<BTreeMap<String, Vec<u8>>> {
    data.iter()
        .map(|(k, v)| {
            BASE64_STANDARD
                .decode(v.as_bytes())
                .map(|bytes| (k.clone(), bytes))
                .map_err(|e| Error::Validation(format!("secret key {k:?} is not valid base64: {e}")))
        })
        .collect()
}
