//! Registry of the desired-state kinds served by this controller

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{CustomResourceExt, Resource};
use serving_api::{InferenceService, KVCachePool, LLMInferenceJob};

/// A registered kind together with its CRD manifest
#[derive(Clone, Debug)]
pub struct KindRegistration {
    pub kind: String,
    /// Fully qualified CRD name, `<plural>.<group>`
    pub crd_name: String,
    pub crd: CustomResourceDefinition,
}

/// Kinds known to the controller, built once at startup and passed to
/// whatever needs to enumerate them
#[derive(Clone, Debug, Default)]
pub struct KindRegistry {
    kinds: Vec<KindRegistration>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every kind this controller reconciles
    pub fn standard() -> Self {
        Self::new()
            .register::<InferenceService>()
            .register::<KVCachePool>()
            .register::<LLMInferenceJob>()
    }

    /// Register a kind; registering the same kind twice is a no-op
    pub fn register<K>(mut self) -> Self
    where
        K: CustomResourceExt + Resource<DynamicType = ()>,
    {
        let kind = K::kind(&()).into_owned();
        if !self.contains(&kind) {
            self.kinds.push(KindRegistration {
                kind,
                crd_name: K::crd_name().to_string(),
                crd: K::crd(),
            });
        }
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.get(kind).is_some()
    }

    pub fn get(&self, kind: &str) -> Option<&KindRegistration> {
        self.kinds.iter().find(|registration| registration.kind == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &KindRegistration> {
        self.kinds.iter()
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.kinds.iter().map(|registration| registration.kind.as_str()).collect()
    }

    /// All CRD manifests as a multi-document YAML stream
    pub fn crd_manifests(&self) -> Result<String, serde_yaml::Error> {
        let mut out = String::new();
        for registration in &self.kinds {
            out.push_str("---\n");
            out.push_str(&serde_yaml::to_string(&registration.crd)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry() {
        let registry = KindRegistry::standard();
        assert_eq!(
            registry.kinds(),
            vec!["InferenceService", "KVCachePool", "LLMInferenceJob"]
        );
        assert_eq!(
            registry.get("KVCachePool").unwrap().crd_name,
            "kvcachepools.llm.example.com"
        );
    }

    #[test]
    fn test_duplicate_registration_ignored() {
        let registry = KindRegistry::new()
            .register::<KVCachePool>()
            .register::<KVCachePool>();
        assert_eq!(registry.iter().count(), 1);
    }

    #[test]
    fn test_crd_manifests() {
        let yaml = KindRegistry::standard().crd_manifests().unwrap();
        assert_eq!(yaml.matches("---\n").count(), 3);
        assert!(yaml.contains("name: inferenceservices.llm.example.com"));
        assert!(yaml.contains("scope: Namespaced"));
    }
}
