//! Aspects: a join point and the advice applied where it matches.
//!
//! - `join_point.rs`: predicates and pre-filters
//! - `advice.rs`: mutations and their inverses
//! - `template.rs`: code templates carried by advice
//! - `builtin.rs`: aspects shipped with the weaver

pub mod advice;
pub mod builtin;
pub mod join_point;
pub mod template;

pub use advice::{Advice, Revert, WrapSite};
pub use builtin::builtin_aspects;
pub use join_point::{FileFacts, FunctionMatcher, JoinPoint, MayMatch, PackageFacts, Signature, TypeMatch};
pub use template::Template;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Aspect {
    /// Unique within the document that declares it.
    pub id: String,
    /// Safe to apply inside the instrumentation runtime's own packages.
    #[serde(default)]
    pub tracer_internal: bool,
    pub join_point: JoinPoint,
    pub advice: Vec<Advice>,
}

impl Aspect {
    /// Content hash of the aspect definition, for cache keys.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }

    pub fn package_may_match(&self, facts: &PackageFacts) -> MayMatch {
        self.join_point.package_may_match(facts)
    }

    pub fn file_may_match(&self, facts: &FileFacts) -> MayMatch {
        self.join_point.file_may_match(facts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aspect_document_shape() {
        let json = r#"{
            "id": "pprof",
            "join-point": {"package-name": "main"},
            "advice": [{"add-blank-import": {"path": "net/http/pprof"}}]
        }"#;
        let aspect: Aspect = serde_json::from_str(json).unwrap();
        assert_eq!(aspect.id, "pprof");
        assert!(!aspect.tracer_internal);
        assert_eq!(aspect.join_point, JoinPoint::PackageName("main".into()));
        assert_eq!(aspect.fingerprint().len(), 64);

        let unknown = r#"{"id": "x", "join-point": "source-file", "advice": [], "extra": 1}"#;
        assert!(serde_json::from_str::<Aspect>(unknown).is_err());
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let mut a = builtin_aspects().remove(0);
        let before = a.fingerprint();
        a.tracer_internal = true;
        assert_ne!(before, a.fingerprint());
    }
}
