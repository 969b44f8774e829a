// ABOUTME: Query composer: renders one atomic write statement from a composition graph
// ABOUTME: Clause order is match/merge, create, edges, set, stale-edge cleanup, return

use modelgraph_core::{Object, Statement};
use serde_json::Value;
use tracing::debug;

use crate::composition::Composition;
use crate::cypher::{edge_pattern, node_projection, quote};
use crate::graph::{CompositionGraph, CompositionScope, GraphNode};
use crate::schema::Schema;

/// Per-call save options. Never mutated once a save starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Save the root's own properties only: compositions are neither written nor cleaned up.
    pub exclude_compositions: bool,
    /// Restrict the save to this composition of the root; the root itself is bound, not written.
    pub restrict_to: Option<String>,
    /// Keep edges to children that are missing from the object.
    pub keep_redundancy: bool,
}

impl SaveOptions {
    pub fn restricted(name: &str) -> Self {
        Self {
            restrict_to: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn scope(&self) -> CompositionScope<'_> {
        if self.exclude_compositions {
            CompositionScope::Nothing
        } else if let Some(name) = &self.restrict_to {
            CompositionScope::Only(name)
        } else {
            CompositionScope::All
        }
    }

    fn cleans_up(&self) -> bool {
        !self.exclude_compositions && !self.keep_redundancy
    }
}

pub struct QueryComposer<'a> {
    schema: &'a Schema,
    graph: &'a CompositionGraph,
    options: &'a SaveOptions,
}

impl<'a> QueryComposer<'a> {
    pub fn new(schema: &'a Schema, graph: &'a CompositionGraph, options: &'a SaveOptions) -> Self {
        Self {
            schema,
            graph,
            options,
        }
    }

    pub fn compose(&self) -> Statement {
        let mut params = Object::new();
        let mut clauses = Vec::new();

        clauses.extend(self.match_clauses(&mut params));
        clauses.extend(self.merge_clauses(&mut params));
        clauses.extend(self.create_clause());
        clauses.extend(self.edge_clauses());
        clauses.extend(self.set_clauses(&mut params));

        let mut tail = self.cleanup_clauses();
        tail.extend(self.owner_timestamp_clauses());
        let regroup = !tail.is_empty();
        clauses.extend(tail);
        if regroup {
            clauses.push(format!("WITH DISTINCT {}", self.all_vars()));
        }
        clauses.push(self.return_clause());

        let statement = Statement {
            text: clauses.join("\n"),
            params,
        };
        debug!(
            "Composed save statement for {} ({} nodes, {} parameters)",
            self.label(self.graph.root()),
            self.graph.len(),
            statement.params.len()
        );
        statement
    }

    fn label(&self, node: &GraphNode) -> &'a str {
        self.schema.get(node.model).label()
    }

    fn composition(&self, parent: &GraphNode, name: &str) -> Option<&'a Composition> {
        self.schema.get(parent.model).composition(name)
    }

    fn all_vars(&self) -> String {
        self.graph
            .nodes()
            .iter()
            .map(|n| n.var.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn match_clauses(&self, params: &mut Object) -> Vec<String> {
        self.graph
            .nodes()
            .iter()
            .filter_map(|node| {
                let id = node.id?;
                params.insert(format!("{}_id", node.var), Value::from(id));
                Some(format!(
                    "MATCH ({var}:{label}) WHERE id({var}) = ${var}_id",
                    var = node.var,
                    label = quote(self.label(node)),
                ))
            })
            .collect()
    }

    fn merge_clauses(&self, params: &mut Object) -> Vec<String> {
        let mut clauses = Vec::new();
        for node in self.graph.nodes().iter().filter(|n| n.is_merged()) {
            let Some(unique) = &node.unique else {
                continue;
            };
            let var = &node.var;
            params.insert(format!("{}_unique", var), unique.value.clone());
            params.insert(
                var.clone(),
                Value::Object(node.properties.clone().unwrap_or_default()),
            );

            let mut on_create = vec![format!("{var} = ${var}")];
            if let Some(ts) = self.schema.get(node.model).timestamps() {
                on_create.push(format!("{var}.{} = timestamp()", quote(&ts.created)));
                on_create.push(format!("{var}.{} = timestamp()", quote(&ts.updated)));
            }
            clauses.push(format!(
                "MERGE ({var}:{label} {{{key}: ${var}_unique}}) ON CREATE SET {sets}",
                label = quote(self.label(node)),
                key = quote(&unique.key),
                sets = on_create.join(", "),
            ));
        }
        clauses
    }

    fn create_clause(&self) -> Option<String> {
        let patterns: Vec<String> = self
            .graph
            .nodes()
            .iter()
            .filter(|n| n.is_created())
            .map(|n| format!("({}:{})", n.var, quote(self.label(n))))
            .collect();
        (!patterns.is_empty()).then(|| format!("CREATE {}", patterns.join(", ")))
    }

    /// Edges touching a freshly created node cannot exist yet and are created
    /// outright; edges between two pre-existing nodes are merged so a
    /// re-save never duplicates them.
    fn edge_clauses(&self) -> Vec<String> {
        let mut fresh = Vec::new();
        let mut merged = Vec::new();
        for (parent, child, name) in self.graph.edges() {
            let Some(comp) = self.composition(parent, name) else {
                continue;
            };
            let pattern = edge_pattern(
                &parent.var,
                None,
                &quote(&comp.rel),
                comp.direction,
                &child.var,
            );
            if parent.is_created() || child.is_created() {
                fresh.push(pattern);
            } else {
                merged.push(format!("MERGE {}", pattern));
            }
        }

        let mut clauses = Vec::new();
        if !fresh.is_empty() {
            clauses.push(format!("CREATE {}", fresh.join(", ")));
        }
        clauses.extend(merged);
        clauses
    }

    fn set_clauses(&self, params: &mut Object) -> Vec<String> {
        let mut captures = Vec::new();
        let mut items = Vec::new();

        for node in self.graph.nodes() {
            let Some(properties) = &node.properties else {
                continue;
            };
            if node.is_merged() {
                continue;
            }
            let var = &node.var;
            params.insert(var.clone(), Value::Object(properties.clone()));
            items.push(format!("{var} = ${var}"));

            if let Some(ts) = self.schema.get(node.model).timestamps() {
                if node.is_bound() {
                    captures.push(format!(
                        "coalesce({var}.{}, timestamp()) AS {var}_created",
                        quote(&ts.created)
                    ));
                    items.push(format!("{var}.{} = {var}_created", quote(&ts.created)));
                } else {
                    items.push(format!("{var}.{} = timestamp()", quote(&ts.created)));
                }
                items.push(format!("{var}.{} = timestamp()", quote(&ts.updated)));
            }
        }

        let mut clauses = Vec::new();
        if !captures.is_empty() {
            clauses.push(format!("WITH {}, {}", self.all_vars(), captures.join(", ")));
        }
        if !items.is_empty() {
            clauses.push(format!("SET {}", items.join(", ")));
        }
        clauses
    }

    /// Disconnects children that were removed from the object since it was read.
    fn cleanup_clauses(&self) -> Vec<String> {
        if !self.options.cleans_up() {
            return Vec::new();
        }

        let mut clauses = Vec::new();
        let mut counter = 0;
        for (index, node) in self.graph.nodes().iter().enumerate() {
            let is_root = index == 0;
            let scoped_root = is_root && self.options.restrict_to.is_some();
            if !node.is_bound() || (node.properties.is_none() && !scoped_root) {
                continue;
            }
            let scope = if is_root {
                self.options.scope()
            } else {
                CompositionScope::All
            };

            for comp in self.schema.get(node.model).compositions() {
                if comp.transient || !scope.allows(&comp.name) {
                    continue;
                }
                let kept: Vec<&str> = node
                    .children
                    .iter()
                    .filter(|link| link.composition == comp.name)
                    .map(|link| self.graph.node(link.node).var.as_str())
                    .collect();

                let rel_var = format!("stale{}", counter);
                let other = format!("other{}", counter);
                counter += 1;

                clauses.push(format!("WITH DISTINCT {}", self.all_vars()));
                let pattern = edge_pattern(
                    &node.var,
                    Some(&rel_var),
                    &quote(&comp.rel),
                    comp.direction,
                    &other,
                );
                if kept.is_empty() {
                    clauses.push(format!("OPTIONAL MATCH {}", pattern));
                } else {
                    clauses.push(format!(
                        "OPTIONAL MATCH {} WHERE NOT {} IN [{}]",
                        pattern,
                        other,
                        kept.join(", ")
                    ));
                }
                clauses.push(format!("DELETE {}", rel_var));
            }
        }
        clauses
    }

    /// Refreshes owners that asked to be touched whenever this model is saved on its own.
    fn owner_timestamp_clauses(&self) -> Vec<String> {
        let root = self.graph.root();
        if root.properties.is_none() || self.options.scope() != CompositionScope::All {
            return Vec::new();
        }

        let mut clauses = Vec::new();
        let mut counter = 0;
        for owner in self.schema.models() {
            let Some(ts) = owner.timestamps() else {
                continue;
            };
            for comp in owner.compositions() {
                if comp.target != root.model || !comp.updates_timestamp {
                    continue;
                }
                let owner_var = format!("owner{}", counter);
                counter += 1;
                clauses.push(format!("WITH DISTINCT {}", self.all_vars()));
                clauses.push(format!(
                    "OPTIONAL MATCH {}",
                    edge_pattern(
                        &format!("{}:{}", owner_var, quote(owner.label())),
                        None,
                        &quote(&comp.rel),
                        comp.direction,
                        &root.var,
                    )
                ));
                clauses.push(format!("SET {}.{} = timestamp()", owner_var, quote(&ts.updated)));
            }
        }
        clauses
    }

    fn return_clause(&self) -> String {
        let id_field = self.schema.id_field();
        let columns: Vec<String> = self
            .graph
            .nodes()
            .iter()
            .map(|n| format!("{} AS {}", node_projection(&n.var, id_field), n.var))
            .collect();
        format!("RETURN {}", columns.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::CompositionOptions;
    use crate::graph::GraphBuilder;
    use crate::test_support::{meal_schema, object};
    use serde_json::json;

    fn render(schema: &Schema, model: crate::ModelId, source: Value, opts: SaveOptions) -> Statement {
        let graph = GraphBuilder::new(schema, opts.scope())
            .root_as_reference(opts.restrict_to.is_some())
            .build(model, &object(source));
        QueryComposer::new(schema, &graph, &opts).compose()
    }

    #[test]
    fn new_tree_creates_nodes_and_edges_without_cleanup() {
        let (schema, meal, _) = meal_schema();
        let statement = render(
            &schema,
            meal,
            json!({"name": "Meal", "matchingBeers": [{"name": "A"}, {"name": "B"}]}),
            SaveOptions::default(),
        );

        assert_eq!(
            statement.text,
            [
                "CREATE (meal_0:`Meal`), (beer_1:`Beer`), (beer_2:`Beer`)",
                "CREATE (meal_0)-[:`matches`]->(beer_1), (meal_0)-[:`matches`]->(beer_2)",
                "SET meal_0 = $meal_0, beer_1 = $beer_1, beer_2 = $beer_2",
                "RETURN meal_0{.*, `id`: id(meal_0)} AS meal_0, beer_1{.*, `id`: id(beer_1)} AS beer_1, beer_2{.*, `id`: id(beer_2)} AS beer_2",
            ]
            .join("\n")
        );
        assert_eq!(statement.params["beer_1"], json!({"name": "A"}));
        assert_eq!(statement.params["meal_0"], json!({"name": "Meal"}));
    }

    #[test]
    fn existing_tree_binds_merges_edges_and_removes_stale_ones() {
        let (schema, meal, _) = meal_schema();
        let statement = render(
            &schema,
            meal,
            json!({"id": 1, "name": "Meal", "matchingBeers": [{"id": 2, "name": "A"}]}),
            SaveOptions::default(),
        );

        assert!(statement
            .text
            .starts_with("MATCH (meal_0:`Meal`) WHERE id(meal_0) = $meal_0_id\nMATCH (beer_1:`Beer`) WHERE id(beer_1) = $beer_1_id"));
        assert!(!statement.text.contains("CREATE"));
        assert!(statement.text.contains("MERGE (meal_0)-[:`matches`]->(beer_1)"));
        assert!(statement.text.contains(
            "OPTIONAL MATCH (meal_0)-[stale0:`matches`]->(other0) WHERE NOT other0 IN [beer_1]\nDELETE stale0"
        ));
        assert!(statement.text.contains("WITH DISTINCT meal_0, beer_1\nRETURN"));
        assert_eq!(statement.params["meal_0_id"], json!(1));
        assert_eq!(statement.params["beer_1"], json!({"name": "A"}));
    }

    #[test]
    fn emptied_composition_deletes_every_edge_of_its_type() {
        let (schema, meal, _) = meal_schema();
        let statement = render(&schema, meal, json!({"id": 1, "name": "Meal"}), SaveOptions::default());
        assert!(statement
            .text
            .contains("OPTIONAL MATCH (meal_0)-[stale0:`matches`]->(other0)\nDELETE stale0"));
    }

    #[test]
    fn keep_redundancy_and_exclusion_skip_cleanup() {
        let (schema, meal, _) = meal_schema();
        let keep = SaveOptions {
            keep_redundancy: true,
            ..Default::default()
        };
        let statement = render(&schema, meal, json!({"id": 1, "name": "Meal"}), keep);
        assert!(!statement.text.contains("DELETE"));

        let exclude = SaveOptions {
            exclude_compositions: true,
            ..Default::default()
        };
        let statement = render(
            &schema,
            meal,
            json!({"id": 1, "name": "Meal", "matchingBeers": [{"name": "A"}]}),
            exclude,
        );
        assert!(!statement.text.contains("DELETE"));
        assert!(!statement.text.contains("Beer"));
    }

    #[test]
    fn restricted_save_binds_root_without_setting_it() {
        let (mut schema, meal, beer) = meal_schema();
        schema
            .model_mut(meal)
            .compose(beer, "dessertBeer", "dessert", CompositionOptions::default());
        let statement = render(
            &schema,
            meal,
            json!({"id": 1, "dessertBeer": {"name": "D"}}),
            SaveOptions::restricted("dessertBeer"),
        );

        assert!(!statement.text.contains("meal_0 = $meal_0"));
        assert!(statement.text.contains("CREATE (meal_0)-[:`dessert`]->(beer_1)"));
        assert!(statement
            .text
            .contains("OPTIONAL MATCH (meal_0)-[stale0:`dessert`]->(other0) WHERE NOT other0 IN [beer_1]"));
        assert!(!statement.text.contains("`matches`"));
    }

    #[test]
    fn transient_compositions_never_touch_edges() {
        let (mut schema, meal, beer) = meal_schema();
        schema.model_mut(meal).compose(
            beer,
            "favourites",
            "likes",
            CompositionOptions::many().transient(),
        );
        let statement = render(
            &schema,
            meal,
            json!({"id": 1, "favourites": [{"id": 9}], "matchingBeers": []}),
            SaveOptions::default(),
        );
        assert!(!statement.text.contains("`likes`"));
        assert!(statement.text.contains("`matches`"));
    }

    #[test]
    fn timestamps_preserve_created_and_refresh_updated() {
        let (mut schema, meal, _) = meal_schema();
        schema.model_mut(meal).use_timestamps();
        let statement = render(
            &schema,
            meal,
            json!({"id": 1, "name": "Meal", "created": 5, "updated": 6}),
            SaveOptions::default(),
        );

        assert!(statement.text.contains(
            "WITH meal_0, coalesce(meal_0.`created`, timestamp()) AS meal_0_created\nSET meal_0 = $meal_0, meal_0.`created` = meal_0_created, meal_0.`updated` = timestamp()"
        ));
        assert_eq!(statement.params["meal_0"], json!({"name": "Meal"}));

        let fresh = render(&schema, meal, json!({"name": "New"}), SaveOptions::default());
        assert!(fresh
            .text
            .contains("SET meal_0 = $meal_0, meal_0.`created` = timestamp(), meal_0.`updated` = timestamp()"));
    }

    #[test]
    fn return_old_uniqueness_merges_by_key() {
        let (mut schema, meal, beer) = meal_schema();
        schema.model_mut(beer).set_unique_key("name", true);
        let statement = render(
            &schema,
            meal,
            json!({"id": 1, "matchingBeers": [{"name": "IPA", "abv": 6}]}),
            SaveOptions::default(),
        );

        assert!(statement
            .text
            .contains("MERGE (beer_1:`Beer` {`name`: $beer_1_unique}) ON CREATE SET beer_1 = $beer_1"));
        assert!(statement.text.contains("MERGE (meal_0)-[:`matches`]->(beer_1)"));
        assert!(!statement.text.contains("beer_1 = $beer_1,"));
        assert!(!statement.text.contains("CREATE (beer_1"));
        assert_eq!(statement.params["beer_1_unique"], json!("IPA"));
    }

    #[test]
    fn hard_uniqueness_creates_and_leaves_conflict_to_database() {
        let (mut schema, _, beer) = meal_schema();
        schema.model_mut(beer).set_unique_key("name", false);
        let statement = render(&schema, beer, json!({"name": "IPA"}), SaveOptions::default());
        assert!(statement.text.starts_with("CREATE (beer_0:`Beer`)"));
        assert!(!statement.text.contains("MERGE"));
    }

    #[test]
    fn incoming_compositions_reverse_edges() {
        let (mut schema, meal, beer) = meal_schema();
        schema.model_mut(meal).compose(
            beer,
            "pairedBy",
            "pairs",
            CompositionOptions::default().incoming(),
        );
        let statement = render(
            &schema,
            meal,
            json!({"id": 1, "pairedBy": {"id": 4}}),
            SaveOptions::default(),
        );
        assert!(statement.text.contains("MERGE (meal_0)<-[:`pairs`]-(beer_1)"));
        assert!(statement
            .text
            .contains("OPTIONAL MATCH (meal_0)<-[stale1:`pairs`]-(other1) WHERE NOT other1 IN [beer_1]"));
    }

    #[test]
    fn codependent_owner_timestamp_is_refreshed() {
        let (mut schema, meal, beer) = meal_schema();
        schema.model_mut(meal).use_timestamps().compose(
            beer,
            "matchingBeers",
            "matches",
            CompositionOptions::many().updates_timestamp(),
        );
        let statement = render(&schema, beer, json!({"id": 2, "name": "A"}), SaveOptions::default());
        assert!(statement
            .text
            .contains("OPTIONAL MATCH (owner0:`Meal`)-[:`matches`]->(beer_0)\nSET owner0.`updated` = timestamp()"));
        assert!(statement.text.contains("WITH DISTINCT beer_0\nRETURN"));
    }
}
