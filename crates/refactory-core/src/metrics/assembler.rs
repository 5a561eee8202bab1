//! Feature vector assembly in model training order.
//!
//! Models name their inputs in their own vocabulary (`classLCC`,
//! `methodLoc`, ...). Every name is first translated to the canonical metric
//! vocabulary of [`crate::metrics::adapter`], then looked up in the unit's
//! metric maps. The output position of a value is always the position of its
//! name in the model's feature list; nothing else may influence the order.
//!
//! A `class`/`method` prefix routes the lookup to that scope's map only, and
//! `variable:`/`field:` names address the usage map. Untagged names such as
//! `isInnerClass` or `startLine` take the first map holding them, in the
//! order the maps were added.

use crate::metrics::adapter::{MetricMap, FIELD_USAGE_PREFIX, VARIABLE_USAGE_PREFIX};

/// Scope tags that may prefix a model feature name.
pub const SCOPE_PREFIXES: &[(&str, MetricScope)] = &[
    ("class", MetricScope::Class),
    ("method", MetricScope::Method),
];

/// Model-vocabulary names (after prefix stripping) whose canonical name is
/// not simply the uncapitalized remainder.
pub const RENAMES: &[(&str, &str)] = &[
    ("LCC", "looseClassCohesion"),
    ("TCC", "tightClassCohesion"),
    ("SubClassesQty", "innerClassesQty"),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricScope {
    Class,
    Method,
    Usage,
}

/// A required feature translated to the canonical vocabulary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanonicalFeature {
    pub model_name: String,
    pub canonical: String,
    /// Scope named by the stripped prefix or usage namespace, if any.
    pub scope: Option<MetricScope>,
}

/// Translate one model feature name.
pub fn canonical_feature(model_name: &str) -> CanonicalFeature {
    if model_name.starts_with(VARIABLE_USAGE_PREFIX) || model_name.starts_with(FIELD_USAGE_PREFIX) {
        return CanonicalFeature {
            model_name: model_name.to_string(),
            canonical: model_name.to_string(),
            scope: Some(MetricScope::Usage),
        };
    }

    let mut remainder = model_name;
    let mut scope = None;
    for (prefix, prefix_scope) in SCOPE_PREFIXES {
        if let Some(rest) = model_name.strip_prefix(*prefix) {
            if rest.starts_with(|c: char| c.is_ascii_uppercase()) {
                remainder = rest;
                scope = Some(*prefix_scope);
                break;
            }
        }
    }

    let canonical = RENAMES
        .iter()
        .find(|(from, _)| *from == remainder)
        .map(|(_, to)| to.to_string())
        .unwrap_or_else(|| uncapitalize(remainder));

    CanonicalFeature {
        model_name: model_name.to_string(),
        canonical,
        scope,
    }
}

fn uncapitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Canonical translation of a model's ordered feature list, computed once
/// per model and reused for every unit.
#[derive(Clone, Debug)]
pub struct FeatureLayout {
    features: Vec<CanonicalFeature>,
}

impl FeatureLayout {
    pub fn new<S: AsRef<str>>(required: &[S]) -> Self {
        Self {
            features: required
                .iter()
                .map(|name| canonical_feature(name.as_ref()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn features(&self) -> &[CanonicalFeature] {
        &self.features
    }
}

/// Metric maps of one unit, in lookup priority order.
#[derive(Clone, Debug, Default)]
pub struct UnitMaps {
    maps: Vec<(MetricScope, MetricMap)>,
}

impl UnitMaps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, scope: MetricScope, map: MetricMap) -> Self {
        self.maps.push((scope, map));
        self
    }

    /// A name tagged with a scope is only looked up in that scope's maps;
    /// an untagged name takes the first map holding the key.
    fn lookup(&self, feature: &CanonicalFeature) -> Option<f64> {
        self.maps
            .iter()
            .filter(|(scope, _)| feature.scope.map_or(true, |tag| tag == *scope))
            .find_map(|(_, map)| map.get(&feature.canonical).copied())
    }
}

/// A unit lacking at least one required feature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unscoreable {
    pub missing: String,
}

/// Build the model input for one unit.
///
/// NaN and infinite values become `0.0`; they come from degenerate metrics
/// (e.g. cohesion of a class without methods) and would break inference.
pub fn assemble_with_layout(
    layout: &FeatureLayout,
    maps: &UnitMaps,
) -> Result<Vec<f32>, Unscoreable> {
    let mut vector = Vec::with_capacity(layout.len());
    for feature in layout.features() {
        let value = maps.lookup(feature).ok_or_else(|| Unscoreable {
            missing: feature.model_name.clone(),
        })?;
        let value = value as f32;
        vector.push(if value.is_finite() { value } else { 0.0 });
    }
    Ok(vector)
}

/// One-shot form of [`assemble_with_layout`].
pub fn assemble<S: AsRef<str>>(
    required: &[S],
    maps: &UnitMaps,
) -> Result<Vec<f32>, Unscoreable> {
    assemble_with_layout(&FeatureLayout::new(required), maps)
}
