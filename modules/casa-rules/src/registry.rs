//! Ordered rule registry.

use std::sync::Arc;

use crate::traits::Rule;

/// Rules in registration order. Duplicates are allowed.
///
/// Built by the application before the engine starts and moved into the
/// engine, which reads it once per run.
#[derive(Default, Clone)]
pub struct RuleRegistry {
    rules: Vec<Arc<dyn Rule>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, rule: impl Rule + 'static) {
        self.rules.push(Arc::new(rule));
    }

    /// Register an already shared rule, e.g. one a test keeps a handle to.
    pub fn register_arc(&mut self, rule: Arc<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[Arc<dyn Rule>] {
        &self.rules
    }

    /// Union of every rule's topic filters, in registration order.
    /// Not deduplicated; the bus tolerates repeated subscriptions.
    pub fn topics(&self) -> Vec<String> {
        self.rules.iter().flat_map(|r| r.topics()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|r| r.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Feedback;
    use anyhow::Result;
    use async_trait::async_trait;

    struct Named(&'static str, Vec<&'static str>);

    #[async_trait]
    impl Rule for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn topics(&self) -> Vec<String> {
            self.1.iter().map(|t| t.to_string()).collect()
        }

        async fn handle_message(&self, _: &str, _: &[u8], _: &Feedback) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn keeps_registration_order_and_duplicates() {
        let mut registry = RuleRegistry::new();
        registry.register(Named("b", vec!["x"]));
        registry.register(Named("a", vec!["y"]));
        registry.register(Named("b", vec!["x"]));

        let names: Vec<&str> = registry.rules().iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["b", "a", "b"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn topics_is_union_in_order() {
        let mut registry = RuleRegistry::new();
        registry.register(Named("one", vec!["test/test"]));
        registry.register(Named("two", vec!["test/test", "test/test2"]));

        assert_eq!(
            registry.topics(),
            vec!["test/test", "test/test", "test/test2"]
        );
    }

    #[test]
    fn empty_registry() {
        let registry = RuleRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.topics().is_empty());
    }
}
