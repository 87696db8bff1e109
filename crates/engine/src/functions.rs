//! Registry of native functions callable from `PipeFunc` pipes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::content::StuffContent;
use crate::error::FunctionError;
use crate::memory::WorkingMemory;

/// A function reads working memory and returns the content of its result.
pub type PipeFunction = Arc<dyn Fn(&WorkingMemory) -> Result<StuffContent, FunctionError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, PipeFunction>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry").field("functions", &names).finish()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&WorkingMemory) -> Result<StuffContent, FunctionError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    pub fn with_function<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&WorkingMemory) -> Result<StuffContent, FunctionError> + Send + Sync + 'static,
    {
        self.register(name, function);
        self
    }

    pub fn get(&self, name: &str) -> Option<PipeFunction> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_functions_are_callable() {
        let registry = FunctionRegistry::new().with_function("constant", |_memory: &WorkingMemory| Ok(StuffContent::text("42")));
        let function = registry.get("constant").expect("registered");
        assert_eq!(function(&WorkingMemory::new()).expect("call"), StuffContent::text("42"));
        assert!(registry.get("missing").is_none());
    }
}
