//! Request classification into routing classes.

pub mod classifier;
pub mod config;

pub use classifier::{Classifier, Predicate, Rule, RoutingClass};
pub use config::RoutingConfig;
