//! Projection of static-analysis results onto flat metric maps.
//!
//! Each result kind has one explicit projection listing every numeric field
//! under its canonical (camelCase) name. Non-numeric fields are dropped, with
//! the exception of the class kind, which becomes the `isInnerClass` flag.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Canonical metric name -> value for one analyzed unit.
pub type MetricMap = IndexMap<String, f64>;

/// Key of the 0/1 flag derived from [`ClassKind`].
pub const IS_INNER_CLASS: &str = "isInnerClass";

/// Namespaces of usage keys. Canonical metric names never contain `:`, so an
/// identifier from user code can never stand in for a metric.
pub const VARIABLE_USAGE_PREFIX: &str = "variable:";
pub const FIELD_USAGE_PREFIX: &str = "field:";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassKind {
    #[default]
    Class,
    #[serde(rename = "innerclass")]
    InnerClass,
    Interface,
    Enum,
    Anonymous,
}

/// Class-level result of the analysis engine.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClassMetrics {
    /// Path of the source file, absolute or relative to the checkout root.
    pub file: String,
    pub class_name: String,
    #[serde(rename = "type")]
    pub kind: ClassKind,
    pub cbo: u32,
    pub dit: u32,
    pub noc: u32,
    pub wmc: u32,
    pub rfc: u32,
    pub lcom: u32,
    pub loc: u32,
    pub nosi: u32,
    /// Modifier bit set as reported by the engine.
    pub modifiers: u32,
    pub loose_class_cohesion: f32,
    pub tight_class_cohesion: f32,
    pub number_of_methods: u32,
    pub number_of_static_methods: u32,
    pub number_of_public_methods: u32,
    pub number_of_private_methods: u32,
    pub number_of_protected_methods: u32,
    pub number_of_default_methods: u32,
    pub number_of_abstract_methods: u32,
    pub number_of_final_methods: u32,
    pub number_of_synchronized_methods: u32,
    pub number_of_fields: u32,
    pub number_of_static_fields: u32,
    pub number_of_public_fields: u32,
    pub number_of_private_fields: u32,
    pub number_of_protected_fields: u32,
    pub number_of_default_fields: u32,
    pub number_of_final_fields: u32,
    pub number_of_synchronized_fields: u32,
    pub return_qty: u32,
    pub loop_qty: u32,
    pub comparisons_qty: u32,
    pub try_catch_qty: u32,
    pub parenthesized_exps_qty: u32,
    pub string_literals_qty: u32,
    pub numbers_qty: u32,
    pub assignments_qty: u32,
    pub math_operations_qty: u32,
    pub variables_qty: u32,
    pub max_nested_blocks: u32,
    pub anonymous_classes_qty: u32,
    pub inner_classes_qty: u32,
    pub lambdas_qty: u32,
    pub unique_words_qty: u32,
    pub methods: Vec<MethodMetrics>,
}

/// Method-level result nested inside a [`ClassMetrics`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MethodMetrics {
    /// Engine-qualified name, e.g. `run/1[int]`.
    pub method_name: String,
    pub start_line: u32,
    pub constructor: bool,
    pub cbo: u32,
    pub wmc: u32,
    pub rfc: u32,
    pub loc: u32,
    pub modifiers: u32,
    pub return_qty: u32,
    pub variables_qty: u32,
    pub parameters_qty: u32,
    pub loop_qty: u32,
    pub comparisons_qty: u32,
    pub try_catch_qty: u32,
    pub parenthesized_exps_qty: u32,
    pub string_literals_qty: u32,
    pub numbers_qty: u32,
    pub assignments_qty: u32,
    pub math_operations_qty: u32,
    pub max_nested_blocks: u32,
    pub anonymous_classes_qty: u32,
    pub inner_classes_qty: u32,
    pub lambdas_qty: u32,
    pub unique_words_qty: u32,
    pub log_statements_qty: u32,
    pub variables_usage: BTreeMap<String, u32>,
    pub field_usage: BTreeMap<String, u32>,
}

impl MethodMetrics {
    /// Method name without the engine's parameter suffix.
    pub fn display_name(&self) -> &str {
        self.method_name
            .split('/')
            .next()
            .unwrap_or(self.method_name.as_str())
    }
}

/// One unit handed to [`adapt`].
#[derive(Clone, Copy, Debug)]
pub enum UnitResult<'a> {
    Class(&'a ClassMetrics),
    Method(&'a MethodMetrics),
    /// Per-variable and per-field usage counts of a method.
    Usage(&'a MethodMetrics),
}

/// Convert one analysis result into a uniform metric map.
pub fn adapt(unit: UnitResult<'_>) -> MetricMap {
    match unit {
        UnitResult::Class(class) => class_map(class),
        UnitResult::Method(method) => method_map(method),
        UnitResult::Usage(method) => usage_map(method),
    }
}

fn put(map: &mut MetricMap, key: &str, value: impl Into<f64>) {
    map.insert(key.to_string(), value.into());
}

pub fn class_map(c: &ClassMetrics) -> MetricMap {
    let mut m = MetricMap::with_capacity(48);
    put(&mut m, "cbo", c.cbo);
    put(&mut m, "dit", c.dit);
    put(&mut m, "noc", c.noc);
    put(&mut m, "wmc", c.wmc);
    put(&mut m, "rfc", c.rfc);
    put(&mut m, "lcom", c.lcom);
    put(&mut m, "loc", c.loc);
    put(&mut m, "nosi", c.nosi);
    put(&mut m, "modifiers", c.modifiers);
    put(&mut m, "looseClassCohesion", c.loose_class_cohesion);
    put(&mut m, "tightClassCohesion", c.tight_class_cohesion);
    put(&mut m, "numberOfMethods", c.number_of_methods);
    put(&mut m, "numberOfStaticMethods", c.number_of_static_methods);
    put(&mut m, "numberOfPublicMethods", c.number_of_public_methods);
    put(&mut m, "numberOfPrivateMethods", c.number_of_private_methods);
    put(&mut m, "numberOfProtectedMethods", c.number_of_protected_methods);
    put(&mut m, "numberOfDefaultMethods", c.number_of_default_methods);
    put(&mut m, "numberOfAbstractMethods", c.number_of_abstract_methods);
    put(&mut m, "numberOfFinalMethods", c.number_of_final_methods);
    put(&mut m, "numberOfSynchronizedMethods", c.number_of_synchronized_methods);
    put(&mut m, "numberOfFields", c.number_of_fields);
    put(&mut m, "numberOfStaticFields", c.number_of_static_fields);
    put(&mut m, "numberOfPublicFields", c.number_of_public_fields);
    put(&mut m, "numberOfPrivateFields", c.number_of_private_fields);
    put(&mut m, "numberOfProtectedFields", c.number_of_protected_fields);
    put(&mut m, "numberOfDefaultFields", c.number_of_default_fields);
    put(&mut m, "numberOfFinalFields", c.number_of_final_fields);
    put(&mut m, "numberOfSynchronizedFields", c.number_of_synchronized_fields);
    put(&mut m, "returnQty", c.return_qty);
    put(&mut m, "loopQty", c.loop_qty);
    put(&mut m, "comparisonsQty", c.comparisons_qty);
    put(&mut m, "tryCatchQty", c.try_catch_qty);
    put(&mut m, "parenthesizedExpsQty", c.parenthesized_exps_qty);
    put(&mut m, "stringLiteralsQty", c.string_literals_qty);
    put(&mut m, "numbersQty", c.numbers_qty);
    put(&mut m, "assignmentsQty", c.assignments_qty);
    put(&mut m, "mathOperationsQty", c.math_operations_qty);
    put(&mut m, "variablesQty", c.variables_qty);
    put(&mut m, "maxNestedBlocks", c.max_nested_blocks);
    put(&mut m, "anonymousClassesQty", c.anonymous_classes_qty);
    put(&mut m, "innerClassesQty", c.inner_classes_qty);
    put(&mut m, "lambdasQty", c.lambdas_qty);
    put(&mut m, "uniqueWordsQty", c.unique_words_qty);
    let inner = if c.kind == ClassKind::InnerClass { 1.0 } else { 0.0 };
    put(&mut m, IS_INNER_CLASS, inner);
    m
}

pub fn method_map(x: &MethodMetrics) -> MetricMap {
    let mut m = MetricMap::with_capacity(24);
    put(&mut m, "startLine", x.start_line);
    put(&mut m, "cbo", x.cbo);
    put(&mut m, "wmc", x.wmc);
    put(&mut m, "rfc", x.rfc);
    put(&mut m, "loc", x.loc);
    put(&mut m, "modifiers", x.modifiers);
    put(&mut m, "returnQty", x.return_qty);
    put(&mut m, "variablesQty", x.variables_qty);
    put(&mut m, "parametersQty", x.parameters_qty);
    put(&mut m, "loopQty", x.loop_qty);
    put(&mut m, "comparisonsQty", x.comparisons_qty);
    put(&mut m, "tryCatchQty", x.try_catch_qty);
    put(&mut m, "parenthesizedExpsQty", x.parenthesized_exps_qty);
    put(&mut m, "stringLiteralsQty", x.string_literals_qty);
    put(&mut m, "numbersQty", x.numbers_qty);
    put(&mut m, "assignmentsQty", x.assignments_qty);
    put(&mut m, "mathOperationsQty", x.math_operations_qty);
    put(&mut m, "maxNestedBlocks", x.max_nested_blocks);
    put(&mut m, "anonymousClassesQty", x.anonymous_classes_qty);
    put(&mut m, "innerClassesQty", x.inner_classes_qty);
    put(&mut m, "lambdasQty", x.lambdas_qty);
    put(&mut m, "uniqueWordsQty", x.unique_words_qty);
    put(&mut m, "logStatementsQty", x.log_statements_qty);
    m
}

/// Usage counts keyed `variable:<name>` and `field:<name>`.
pub fn usage_map(x: &MethodMetrics) -> MetricMap {
    let mut m = MetricMap::with_capacity(x.variables_usage.len() + x.field_usage.len());
    for (name, count) in &x.variables_usage {
        put(&mut m, &format!("{VARIABLE_USAGE_PREFIX}{name}"), *count);
    }
    for (name, count) in &x.field_usage {
        put(&mut m, &format!("{FIELD_USAGE_PREFIX}{name}"), *count);
    }
    m
}
