//! Services shared by every worker: code transformation and pricing.

use crate::dapp::{DAppCode, DAppJar, LoadedCode};
use crate::energy::PricingPolicy;
use crate::error::TransformError;
use alloy_primitives::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Version stamped into transformed code. Code carrying another version is
/// re-transformed.
pub const TRANSFORMATION_VERSION: u32 = 1;

/// Verifies and rewrites deployable code, and loads rewritten code.
pub trait DAppTransformer: Send + Sync {
    /// Checks `code` and produces the transformed form stored next to it.
    fn verify_and_transform(
        &self,
        code: &[u8],
        preserve_debuggability: bool,
    ) -> Result<Bytes, TransformError>;

    /// Instantiates previously transformed code.
    fn load(&self, transformed: &[u8]) -> Result<LoadedCode, TransformError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct TransformedJar {
    version: u32,
    main_class: String,
    classes: Vec<String>,
    debuggable: bool,
}

/// Class name prefixes contract archives may not ship.
const FORBIDDEN_PREFIXES: [&str; 3] = ["java.lang.reflect.", "java.lang.invoke.", "java.io."];

/// Transformer backed by natively implemented contracts, looked up by main class.
#[derive(Default, Clone)]
pub struct NativeCodeRegistry {
    contracts: HashMap<String, Arc<dyn DAppCode>>,
}

impl NativeCodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, main_class: &str, code: Arc<dyn DAppCode>) -> &mut Self {
        self.contracts.insert(main_class.to_string(), code);
        self
    }

    pub fn with(mut self, main_class: &str, code: Arc<dyn DAppCode>) -> Self {
        self.register(main_class, code);
        self
    }

    pub fn contains(&self, main_class: &str) -> bool {
        self.contracts.contains_key(main_class)
    }
}

impl DAppTransformer for NativeCodeRegistry {
    fn verify_and_transform(
        &self,
        code: &[u8],
        preserve_debuggability: bool,
    ) -> Result<Bytes, TransformError> {
        let jar = DAppJar::decode(code).map_err(TransformError::MalformedArchive)?;
        if let Some(class) = jar
            .classes
            .iter()
            .find(|c| c.is_empty() || FORBIDDEN_PREFIXES.iter().any(|p| c.starts_with(p)))
        {
            return Err(TransformError::RejectedClass(class.clone()));
        }
        if !jar.classes.contains(&jar.main_class) {
            return Err(TransformError::RejectedClass(jar.main_class));
        }
        if !self.contains(&jar.main_class) {
            return Err(TransformError::UnknownMainClass(jar.main_class));
        }

        let transformed = TransformedJar {
            version: TRANSFORMATION_VERSION,
            main_class: jar.main_class,
            classes: jar.classes,
            debuggable: preserve_debuggability,
        };
        bincode::serialize(&transformed)
            .map(Bytes::from)
            .map_err(|e| TransformError::MalformedArchive(e.to_string()))
    }

    fn load(&self, transformed: &[u8]) -> Result<LoadedCode, TransformError> {
        let jar: TransformedJar = bincode::deserialize(transformed)
            .map_err(|e| TransformError::MalformedArchive(e.to_string()))?;
        if jar.version != TRANSFORMATION_VERSION {
            return Err(TransformError::VersionMismatch {
                found: jar.version,
                expected: TRANSFORMATION_VERSION,
            });
        }
        let code = self
            .contracts
            .get(&jar.main_class)
            .cloned()
            .ok_or_else(|| TransformError::UnknownMainClass(jar.main_class.clone()))?;
        Ok(LoadedCode::new(&jar.main_class, code, jar.classes))
    }
}

/// Constructed once and handed to the engine; replaces any process-global
/// registry.
#[derive(Clone)]
pub struct SharedEnvironment {
    pub transformer: Arc<dyn DAppTransformer>,
    pub pricing: PricingPolicy,
}

impl SharedEnvironment {
    pub fn new(transformer: Arc<dyn DAppTransformer>) -> Self {
        Self {
            transformer,
            pricing: PricingPolicy::default(),
        }
    }

    pub fn with_pricing(mut self, pricing: PricingPolicy) -> Self {
        self.pricing = pricing;
        self
    }
}
