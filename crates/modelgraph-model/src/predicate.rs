use modelgraph_core::Object;
use serde_json::Value;

use crate::cypher::quote;

/// How one property of the root is matched.
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    Equals(Value),
    In(Vec<Value>),
    /// Case-insensitive, dot-all, unicode regular expression.
    Regex(String),
}

/// Property predicate applied to the root of a full scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    entries: Vec<(String, Matcher)>,
    any: bool,
}

impl Predicate {
    /// Every entry must hold.
    pub fn all() -> Self {
        Self::default()
    }

    /// At least one entry must hold.
    pub fn any() -> Self {
        Self {
            entries: Vec::new(),
            any: true,
        }
    }

    /// Equality per key; array values become `IN` matchers.
    pub fn from_object(object: &Object) -> Self {
        object
            .iter()
            .fold(Self::all(), |predicate, (key, value)| match value {
                Value::Array(values) => predicate.one_of(key, values.clone()),
                other => predicate.equals(key, other.clone()),
            })
    }

    pub fn equals(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.push((key.into(), Matcher::Equals(value.into())));
        self
    }

    pub fn one_of(mut self, key: impl Into<String>, values: Vec<Value>) -> Self {
        self.entries.push((key.into(), Matcher::In(values)));
        self
    }

    pub fn matches(mut self, key: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.entries.push((key.into(), Matcher::Regex(pattern.into())));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the condition on `var`, binding values as `where_N` parameters.
    pub(crate) fn render(&self, var: &str, params: &mut Object) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }
        let conditions: Vec<String> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, (key, matcher))| {
                let param = format!("where_{}", i);
                let property = format!("{}.{}", var, quote(key));
                match matcher {
                    Matcher::Equals(value) => {
                        params.insert(param.clone(), value.clone());
                        format!("{} = ${}", property, param)
                    }
                    Matcher::In(values) => {
                        params.insert(param.clone(), Value::Array(values.clone()));
                        format!("{} IN ${}", property, param)
                    }
                    Matcher::Regex(pattern) => {
                        params.insert(param.clone(), Value::String(format!("(?isu){}", pattern)));
                        format!("{} =~ ${}", property, param)
                    }
                }
            })
            .collect();

        let joined = conditions.join(if self.any { " OR " } else { " AND " });
        Some(if conditions.len() > 1 {
            format!("({})", joined)
        } else {
            joined
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_each_matcher_kind() {
        let predicate = Predicate::all()
            .equals("type", "IPA")
            .one_of("brewery", vec![json!("Lervig"), json!("Amundsen")])
            .matches("name", "rye.*");
        let mut params = Object::new();

        let rendered = predicate.render("root", &mut params).unwrap();
        assert_eq!(
            rendered,
            "(root.`type` = $where_0 AND root.`brewery` IN $where_1 AND root.`name` =~ $where_2)"
        );
        assert_eq!(params["where_0"], json!("IPA"));
        assert_eq!(params["where_1"], json!(["Lervig", "Amundsen"]));
        assert_eq!(params["where_2"], json!("(?isu)rye.*"));
    }

    #[test]
    fn any_joins_with_or() {
        let predicate = Predicate::any().equals("a", 1).equals("b", 2);
        let rendered = predicate.render("root", &mut Object::new()).unwrap();
        assert_eq!(rendered, "(root.`a` = $where_0 OR root.`b` = $where_1)");
    }

    #[test]
    fn object_predicates_use_in_for_arrays() {
        let object = json!({"abv": [5, 6], "type": "IPA"}).as_object().cloned().unwrap();
        let predicate = Predicate::from_object(&object);
        let mut params = Object::new();
        let rendered = predicate.render("root", &mut params).unwrap();
        assert!(rendered.contains("root.`abv` IN"));
        assert!(rendered.contains("root.`type` ="));
        assert!(Predicate::all().render("root", &mut params).is_none());
    }
}
