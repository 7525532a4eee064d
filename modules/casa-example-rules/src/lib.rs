//! Example automation rules.
//!
//! Two payload comparators used to exercise the engine end to end:
//! `single` watches `test/test`, `double` watches `test/test` and
//! `test/test2`. Add them to a registry with [`register_all`].

pub mod payload;

use casa_rules::RuleRegistry;

pub use payload::{PayloadRule, TRIGGERED};

pub const SINGLE_OUTPUT: &str = "Rules/test/single";
pub const DOUBLE_OUTPUT: &str = "Rules/test/double";

/// Fires when `test/test` is `1`.
pub fn single() -> PayloadRule {
    PayloadRule::new("test/test = 1", SINGLE_OUTPUT).when("test/test", "1")
}

/// Fires when `test/test` is `1` and `test/test2` is `2`, in either order.
pub fn double() -> PayloadRule {
    PayloadRule::new("test/test = 1 && test/test2 = 2", DOUBLE_OUTPUT)
        .when("test/test", "1")
        .when("test/test2", "2")
}

/// Register every example rule.
pub fn register_all(registry: &mut RuleRegistry) {
    registry.register(single());
    registry.register(double());
}
