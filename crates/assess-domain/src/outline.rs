//! Árbol de outline: la estructura jerárquica de secciones de un assessment,
//! independiente del contenido de cada sección.
//!
//! Rol en el flujo:
//! - El shape JSON `{section_id, level, version, search_key, children}` se
//!   serializa tal cual y se hashea; debe round-trippear byte a byte para que
//!   la detección de cambios por hash sea significativa.
//! - Las mutaciones localizan nodos por `section_id` con un recorrido en
//!   profundidad y devuelven un resultado explícito found/not-found.

use serde::{Deserialize, Serialize};

use crate::DomainError;

/// Nodo recursivo del outline. `version` cuenta las ediciones de contenido de
/// la sección que este nodo representa; `search_key` es la clave posicional
/// asignada al generar el outline desde un template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineNode {
    pub section_id: String,
    pub level: i32,
    pub version: i32,
    pub search_key: String,
    #[serde(default)]
    pub children: Vec<OutlineNode>,
}

impl OutlineNode {
    pub fn leaf(section_id: impl Into<String>, level: i32, search_key: impl Into<String>) -> Self {
        Self { section_id: section_id.into(),
               level,
               version: 0,
               search_key: search_key.into(),
               children: Vec::new() }
    }
}

/// Busca un nodo por id (DFS, orden del documento).
pub fn find_node<'a>(nodes: &'a [OutlineNode], section_id: &str) -> Option<&'a OutlineNode> {
    for node in nodes {
        if node.section_id == section_id {
            return Some(node);
        }
        if let Some(found) = find_node(&node.children, section_id) {
            return Some(found);
        }
    }
    None
}

/// Incrementa la versión del nodo que corresponde a `section_id`.
///
/// Devuelve error si la sección no existe en el árbol: una sección sólo puede
/// editarse dentro del outline al que dice pertenecer.
pub fn bump_section_version(nodes: &mut [OutlineNode], section_id: &str) -> Result<(), DomainError> {
    if bump_first(nodes, section_id) {
        Ok(())
    } else {
        Err(DomainError::SectionNotInOutline(section_id.to_string()))
    }
}

fn bump_first(nodes: &mut [OutlineNode], section_id: &str) -> bool {
    for node in nodes {
        if node.section_id == section_id {
            node.version += 1;
            return true;
        }
        if bump_first(&mut node.children, section_id) {
            return true;
        }
    }
    false
}

/// Variante batch: incrementa la versión de todos los nodos cuyos ids estén en
/// `section_ids` y devuelve cuántos coincidieron. El llamador decide si un
/// resultado cero es error (ninguna de las secciones pertenece al outline).
pub fn bump_section_versions(nodes: &mut [OutlineNode], section_ids: &[String]) -> usize {
    let mut bumped = 0;
    for node in nodes {
        if section_ids.iter().any(|id| id == &node.section_id) {
            node.version += 1;
            bumped += 1;
        }
        bumped += bump_section_versions(&mut node.children, section_ids);
    }
    bumped
}

/// Aplana el árbol en preorden (para listados de secciones).
pub fn flatten(nodes: &[OutlineNode]) -> Vec<&OutlineNode> {
    let mut out = Vec::new();
    fn walk<'a>(nodes: &'a [OutlineNode], out: &mut Vec<&'a OutlineNode>) {
        for node in nodes {
            out.push(node);
            walk(&node.children, out);
        }
    }
    walk(nodes, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> Vec<OutlineNode> {
        let mut root = OutlineNode::leaf("s1", 1, "0");
        let mut child = OutlineNode::leaf("s1.1", 2, "0_0");
        child.children.push(OutlineNode::leaf("s1.1.1", 3, "0_0_0"));
        root.children.push(child);
        vec![root, OutlineNode::leaf("s2", 1, "1")]
    }

    #[test]
    fn find_node_locates_nested_sections() {
        let tree = sample_tree();
        assert!(find_node(&tree, "s1.1.1").is_some());
        assert!(find_node(&tree, "s2").is_some());
        assert!(find_node(&tree, "missing").is_none());
    }

    #[test]
    fn bump_increments_only_the_target() {
        let mut tree = sample_tree();
        bump_section_version(&mut tree, "s1.1").expect("bump");
        assert_eq!(find_node(&tree, "s1.1").unwrap().version, 1);
        assert_eq!(find_node(&tree, "s1").unwrap().version, 0);
        assert_eq!(find_node(&tree, "s1.1.1").unwrap().version, 0);
    }

    #[test]
    fn bump_missing_section_is_an_explicit_error() {
        let mut tree = sample_tree();
        let err = bump_section_version(&mut tree, "ghost").unwrap_err();
        assert_eq!(err, DomainError::SectionNotInOutline("ghost".into()));
    }

    #[test]
    fn bump_many_reports_match_count() {
        let mut tree = sample_tree();
        let n = bump_section_versions(&mut tree, &["s1.1.1".into(), "s2".into(), "nope".into()]);
        assert_eq!(n, 2);
    }

    #[test]
    fn node_shape_round_trips_exactly() {
        let tree = sample_tree();
        let json = serde_json::to_value(&tree).unwrap();
        let back: Vec<OutlineNode> = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(tree, back);
        // los nombres de campo persistidos son parte del contrato
        let first = &json[0];
        for key in ["section_id", "level", "version", "search_key", "children"] {
            assert!(first.get(key).is_some(), "missing field {key}");
        }
    }

    #[test]
    fn flatten_is_preorder() {
        let tree = sample_tree();
        let ids: Vec<&str> = flatten(&tree).iter().map(|n| n.section_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s1.1", "s1.1.1", "s2"]);
    }
}
