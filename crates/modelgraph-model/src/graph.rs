// ABOUTME: Composition graph builder: flattens a nested object into statement-scoped nodes
// ABOUTME: Each node carries its variable name, owning model, own properties and child links

use modelgraph_core::{node_id, object_id, NodeId, Object};
use serde_json::Value;
use tracing::warn;

use crate::composition::elements;
use crate::schema::{ModelId, Schema};

pub type NodeIndex = usize;

/// Which compositions of the root object take part in a call. Levels below
/// the root always use every non-transient composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionScope<'a> {
    All,
    Nothing,
    Only(&'a str),
}

impl CompositionScope<'_> {
    pub fn allows(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Nothing => false,
            Self::Only(only) => *only == name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniqueBinding {
    pub key: String,
    pub value: Value,
    pub return_old: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChildLink {
    pub composition: String,
    pub node: NodeIndex,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    /// Statement-scoped variable name, unique within one graph.
    pub var: String,
    pub model: ModelId,
    pub id: Option<NodeId>,
    /// Own persisted properties; `None` marks a node that is bound but never written.
    pub properties: Option<Object>,
    pub is_new: bool,
    pub unique: Option<UniqueBinding>,
    pub children: Vec<ChildLink>,
    /// Transient composition values handed back untouched after commit.
    pub passthrough: Object,
}

impl GraphNode {
    /// Matched-or-created by unique key instead of created unconditionally.
    pub fn is_merged(&self) -> bool {
        self.unique.as_ref().is_some_and(|u| u.return_old)
    }

    /// Created fresh by this statement.
    pub fn is_created(&self) -> bool {
        self.is_new && !self.is_merged()
    }

    /// Bound by identifier lookup.
    pub fn is_bound(&self) -> bool {
        self.id.is_some()
    }
}

/// Flat arena of graph nodes; index 0 is the root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompositionGraph {
    nodes: Vec<GraphNode>,
}

impl CompositionGraph {
    pub fn root(&self) -> &GraphNode {
        &self.nodes[0]
    }

    pub fn node(&self, index: NodeIndex) -> &GraphNode {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every parent -> child link as `(parent, child, composition name)`.
    pub fn edges(&self) -> impl Iterator<Item = (&GraphNode, &GraphNode, &str)> + '_ {
        self.nodes.iter().flat_map(move |parent| {
            parent
                .children
                .iter()
                .map(move |link| (parent, &self.nodes[link.node], link.composition.as_str()))
        })
    }
}

/// Per-call variable namer; counters never leak between statements.
#[derive(Debug, Default)]
struct VarNamer {
    counter: usize,
}

impl VarNamer {
    fn next(&mut self, label: &str) -> String {
        let mut stem: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect::<String>()
            .to_lowercase();
        if stem.is_empty() || stem.starts_with(|c: char| c.is_ascii_digit()) {
            stem.insert(0, 'n');
        }
        let var = format!("{}_{}", stem, self.counter);
        self.counter += 1;
        var
    }
}

pub struct GraphBuilder<'a> {
    schema: &'a Schema,
    scope: CompositionScope<'a>,
    root_as_reference: bool,
    namer: VarNamer,
    nodes: Vec<GraphNode>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(schema: &'a Schema, scope: CompositionScope<'a>) -> Self {
        Self {
            schema,
            scope,
            root_as_reference: false,
            namer: VarNamer::default(),
            nodes: Vec::new(),
        }
    }

    /// Binds the root by identifier only, never writing its properties.
    pub fn root_as_reference(mut self, yes: bool) -> Self {
        self.root_as_reference = yes;
        self
    }

    pub fn build(mut self, model: ModelId, object: &Object) -> CompositionGraph {
        let reference = self.root_as_reference;
        let scope = self.scope;
        self.add_object(model, object, scope, reference);
        CompositionGraph { nodes: self.nodes }
    }

    fn add_object(
        &mut self,
        model_id: ModelId,
        object: &Object,
        scope: CompositionScope<'_>,
        reference: bool,
    ) -> NodeIndex {
        let schema = self.schema;
        let model = schema.get(model_id);
        let id_field = schema.id_field();
        let id = object_id(object, id_field);
        let is_new = id.is_none();

        let mut properties = object.clone();
        properties.remove(id_field);
        let mut passthrough = Object::new();
        for comp in model.compositions() {
            if let Some(value) = properties.remove(&comp.name) {
                if comp.transient {
                    passthrough.insert(comp.name.clone(), value);
                }
            }
        }
        if let Some(ts) = model.timestamps() {
            properties.remove(&ts.created);
            properties.remove(&ts.updated);
        }

        let unique = model.uniqueness().and_then(|u| {
            if !is_new || !u.applies_to(object) {
                return None;
            }
            match properties.get(&u.key) {
                Some(Value::Null) | None => None,
                Some(value) => Some(UniqueBinding {
                    key: u.key.clone(),
                    value: value.clone(),
                    return_old: u.return_old_on_conflict,
                }),
            }
        });

        let index = self.nodes.len();
        self.nodes.push(GraphNode {
            var: self.namer.next(model.label()),
            model: model_id,
            id,
            properties: if reference { None } else { Some(properties) },
            is_new,
            unique,
            children: Vec::new(),
            passthrough,
        });

        for comp in model.compositions() {
            if comp.transient || !scope.allows(&comp.name) {
                continue;
            }
            let Some(value) = object.get(&comp.name) else {
                continue;
            };
            for element in elements(value) {
                let child = match element {
                    // Children attached to a reference root are related, never rewritten.
                    Value::Object(child) if reference => match object_id(child, id_field) {
                        Some(child_id) => self.add_reference(comp.target, child_id),
                        None => self.add_object(comp.target, child, CompositionScope::All, false),
                    },
                    Value::Object(child) => {
                        self.add_object(comp.target, child, CompositionScope::All, false)
                    }
                    other => match node_id(other, id_field) {
                        Some(child_id) => self.add_reference(comp.target, child_id),
                        None => {
                            warn!(
                                "Ignoring value {} in composition '{}' of {}: not an object or identifier",
                                other,
                                comp.name,
                                model.label()
                            );
                            continue;
                        }
                    },
                };
                self.nodes[index].children.push(ChildLink {
                    composition: comp.name.clone(),
                    node: child,
                });
            }
        }

        index
    }

    fn add_reference(&mut self, model_id: ModelId, id: NodeId) -> NodeIndex {
        let index = self.nodes.len();
        self.nodes.push(GraphNode {
            var: self.namer.next(self.schema.get(model_id).label()),
            model: model_id,
            id: Some(id),
            properties: None,
            is_new: false,
            unique: None,
            children: Vec::new(),
            passthrough: Object::new(),
        });
        index
    }
}
