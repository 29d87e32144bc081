//! Well known labels, annotations and finalizers, plus label selection over them
//!
//! Hardware ownership is tracked purely through labels, so the selectors here double as the
//! registry of which machine holds which hardware.
use std::{collections::BTreeMap, fmt};

/// Label on `Hardware` naming the `TinkerbellMachine` that claimed it
pub const HARDWARE_OWNER_NAME_LABEL: &str = "v1alpha1.tinkerbell.org/ownerName";

/// Label on `Hardware` naming the namespace of the `TinkerbellMachine` that claimed it
pub const HARDWARE_OWNER_NAMESPACE_LABEL: &str = "v1alpha1.tinkerbell.org/ownerNamespace";

/// Finalizer placed on `TinkerbellMachine`s and on the `Hardware` they claim
pub const MACHINE_FINALIZER: &str = "tinkerbellmachine.infrastructure.cluster.x-k8s.io";

/// Finalizer placed on `TinkerbellCluster`s
pub const CLUSTER_FINALIZER: &str = "tinkerbellcluster.infrastructure.cluster.x-k8s.io";

/// Annotation that stops reconciliation of an object
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

/// Label carrying the name of the cluster an object belongs to
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

type Map = BTreeMap<String, String>;

/// A single label requirement
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expression {
    /// The label is set to exactly this value
    Equal(String, String),
    /// The label is absent
    DoesNotExist(String),
}

impl Expression {
    fn matches(&self, labels: &Map) -> bool {
        match self {
            Expression::Equal(key, value) => labels.get(key) == Some(value),
            Expression::DoesNotExist(key) => !labels.contains_key(key),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Equal(key, value) => write!(f, "{key}={value}"),
            Expression::DoesNotExist(key) => write!(f, "!{key}"),
        }
    }
}

/// Conjunction of label requirements
///
/// Renders to the API server's label selector syntax through [`Display`](fmt::Display) and
/// can be evaluated locally with [`Selector::matches`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector(Vec<Expression>);

impl Selector {
    /// Whether every requirement holds for `labels`
    pub fn matches(&self, labels: &Map) -> bool {
        self.0.iter().all(|expr| expr.matches(labels))
    }

    /// An empty selector matches every object
    pub fn selects_all(&self) -> bool {
        self.0.is_empty()
    }

    /// Selects hardware claimed by the named machine
    pub fn owned_by(name: &str, namespace: &str) -> Self {
        Self(vec![
            Expression::Equal(HARDWARE_OWNER_NAME_LABEL.into(), name.into()),
            Expression::Equal(HARDWARE_OWNER_NAMESPACE_LABEL.into(), namespace.into()),
        ])
    }

    /// Selects hardware nobody has claimed
    pub fn unowned() -> Self {
        Self(vec![
            Expression::DoesNotExist(HARDWARE_OWNER_NAME_LABEL.into()),
            Expression::DoesNotExist(HARDWARE_OWNER_NAMESPACE_LABEL.into()),
        ])
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let exprs: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&exprs.join(","))
    }
}

impl FromIterator<Expression> for Selector {
    fn from_iter<T: IntoIterator<Item = Expression>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Expression> for Selector {
    fn from(value: Expression) -> Self {
        Self(vec![value])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Map {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn ownership_selector_strings() {
        assert_eq!(
            Selector::owned_by("m-0", "default").to_string(),
            "v1alpha1.tinkerbell.org/ownerName=m-0,v1alpha1.tinkerbell.org/ownerNamespace=default"
        );
        assert_eq!(
            Selector::unowned().to_string(),
            "!v1alpha1.tinkerbell.org/ownerName,!v1alpha1.tinkerbell.org/ownerNamespace"
        );
        assert_eq!(Selector::default().to_string(), "");
    }

    #[test]
    fn owned_and_unowned_are_disjoint() {
        let claimed = labels(&[
            (HARDWARE_OWNER_NAME_LABEL, "m-0"),
            (HARDWARE_OWNER_NAMESPACE_LABEL, "default"),
            ("rack", "r1"),
        ]);
        let free = labels(&[("rack", "r1")]);
        let half = labels(&[(HARDWARE_OWNER_NAME_LABEL, "m-0")]);

        let owned = Selector::owned_by("m-0", "default");
        assert!(owned.matches(&claimed));
        assert!(!owned.matches(&free));
        assert!(!owned.matches(&half));
        assert!(!Selector::owned_by("m-0", "other").matches(&claimed));

        let unowned = Selector::unowned();
        assert!(unowned.matches(&free));
        assert!(!unowned.matches(&claimed));
        assert!(!unowned.matches(&half));
    }

    #[test]
    fn empty_selector_matches_everything() {
        let selector = Selector::default();
        assert!(selector.selects_all());
        assert!(selector.matches(&Map::new()));
    }
}
