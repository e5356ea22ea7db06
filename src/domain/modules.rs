use std::sync::Arc;

use crate::domain::controlfunctions;
use crate::rpc::registry::Method;

/// A named table of control functions.
#[derive(Debug)]
pub struct ControlModule {
    pub name: &'static str,
    functions: fn() -> Vec<(&'static str, Arc<dyn Method>)>,
}

impl ControlModule {
    /// Builds fresh method instances; stateful functions get their own state
    /// per call.
    pub fn functions(&self) -> Vec<(&'static str, Arc<dyn Method>)> {
        (self.functions)()
    }
}

static MODULES: &[ControlModule] = &[ControlModule {
    name: controlfunctions::MODULE_NAME,
    functions: controlfunctions::functions,
}];

pub fn lookup(name: &str) -> Option<&'static ControlModule> {
    MODULES.iter().find(|module| module.name == name)
}

pub fn available() -> Vec<&'static str> {
    MODULES.iter().map(|module| module.name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_shipped_module() {
        let module = lookup("controlfunctions").expect("shipped module");
        assert_eq!(module.functions().len(), 2);
        assert!(lookup("nosuchmodule").is_none());
        assert_eq!(available(), vec!["controlfunctions"]);
    }
}
