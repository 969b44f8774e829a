use modelgraph_core::Object;
use serde_json::Value;
use std::cmp::Ordering;

use crate::model::Model;

/// Total order over loosely typed property values. Absent and `null` sort
/// first, then booleans, numbers and strings; values of other kinds compare equal.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Orders every ordered `many` composition present on `object` in place.
/// The sort is stable, so equal keys keep their stored order.
pub fn sort_compositions(model: &Model, object: &mut Object) {
    for comp in model.compositions() {
        let Some(order) = &comp.order_by else {
            continue;
        };
        let Some(Value::Array(children)) = object.get_mut(&comp.name) else {
            continue;
        };
        children.sort_by(|a, b| {
            let ordering = compare_values(a.get(&order.property), b.get(&order.property));
            if order.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }
}
