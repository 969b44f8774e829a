//! Small Cypher rendering helpers shared by the write and read paths.

use crate::composition::Direction;

/// Backtick-quotes a label, relationship type or property key.
pub fn quote(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// `a|b|c` alternation of quoted relationship types.
pub fn rel_types<'a>(types: impl IntoIterator<Item = &'a str>) -> String {
    types.into_iter().map(quote).collect::<Vec<_>>().join("|")
}

/// Map projection returning every property plus the node identifier under `id_field`.
pub fn node_projection(var: &str, id_field: &str) -> String {
    format!("{var}{{.*, {}: id({var})}}", quote(id_field))
}

/// Relationship record projection consumed by the coalescer.
pub fn rel_projection(var: &str) -> String {
    format!("{{start: id(startNode({var})), end: id(endNode({var})), type: type({var})}}")
}

/// Renders `(parent)-[rel]->(child)` or `(parent)<-[rel]-(child)`.
pub fn edge_pattern(
    parent: &str,
    rel_var: Option<&str>,
    rel_types: &str,
    direction: Direction,
    child: &str,
) -> String {
    let rel = format!("[{}:{}]", rel_var.unwrap_or(""), rel_types);
    match direction {
        Direction::Out => format!("({parent})-{rel}->({child})"),
        Direction::In => format!("({parent})<-{rel}-({child})"),
    }
}
