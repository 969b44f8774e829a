use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::ModelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    #[default]
    One,
    Many,
}

/// Edge direction as seen from the owning (parent) node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Out,
    In,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub property: String,
    #[serde(default)]
    pub descending: bool,
}

impl OrderBy {
    pub fn ascending(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            descending: false,
        }
    }

    pub fn descending(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            descending: true,
        }
    }
}

/// Options accepted by [`crate::Model::compose`].
#[derive(Debug, Clone, Default)]
pub struct CompositionOptions {
    pub many: bool,
    pub transient: bool,
    pub order_by: Option<OrderBy>,
    pub direction: Direction,
    /// Refresh the owner's updated timestamp when the composed model is saved on its own.
    pub updates_timestamp: bool,
}

impl CompositionOptions {
    pub fn many() -> Self {
        Self {
            many: true,
            ..Self::default()
        }
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = Some(order_by);
        self
    }

    pub fn incoming(mut self) -> Self {
        self.direction = Direction::In;
        self
    }

    pub fn updates_timestamp(mut self) -> Self {
        self.updates_timestamp = true;
        self
    }
}

/// A declared parent -> child relationship that saves and reads create, delete and rebuild.
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub name: String,
    pub rel: String,
    pub target: ModelId,
    pub cardinality: Cardinality,
    pub transient: bool,
    pub order_by: Option<OrderBy>,
    pub direction: Direction,
    pub updates_timestamp: bool,
}

impl Composition {
    pub(crate) fn new(target: ModelId, name: &str, rel: &str, opts: CompositionOptions) -> Self {
        Self {
            name: name.to_string(),
            rel: rel.to_string(),
            target,
            cardinality: if opts.many {
                Cardinality::Many
            } else {
                Cardinality::One
            },
            transient: opts.transient,
            order_by: opts.order_by,
            direction: opts.direction,
            updates_timestamp: opts.updates_timestamp,
        }
    }

    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    /// Collapses a child list to the shape the caller sees: always a list for
    /// `many`, a scalar when exactly one child exists otherwise.
    pub fn unwrap_children(&self, mut children: Vec<Value>) -> Value {
        if !self.is_many() && children.len() == 1 {
            children.remove(0)
        } else {
            Value::Array(children)
        }
    }
}

/// Views a composition value as a list of elements; `null` has none.
pub(crate) fn elements(value: &Value) -> Vec<&Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn comp(many: bool) -> Composition {
        let opts = CompositionOptions {
            many,
            ..Default::default()
        };
        Composition::new(ModelId::from_index(1), "beers", "matches", opts)
    }

    #[test]
    fn single_child_collapses_only_for_one() {
        assert_eq!(comp(false).unwrap_children(vec![json!({"a": 1})]), json!({"a": 1}));
        assert_eq!(
            comp(true).unwrap_children(vec![json!({"a": 1})]),
            json!([{"a": 1}])
        );
    }

    #[test]
    fn several_children_stay_a_list_regardless_of_cardinality() {
        let kids = vec![json!(1), json!(2)];
        assert_eq!(comp(false).unwrap_children(kids), json!([1, 2]));
    }

    #[test]
    fn elements_normalises_scalars_lists_and_null() {
        assert_eq!(elements(&json!(null)).len(), 0);
        assert_eq!(elements(&json!({"a": 1})).len(), 1);
        assert_eq!(elements(&json!([{"a": 1}, {"a": 2}])).len(), 2);
    }
}
