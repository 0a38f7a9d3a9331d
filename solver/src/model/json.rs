//! The on-disk JSON shape of an STNU.
//!
//! The origin (node 0) is implicit: it is omitted from the `nodes` list on
//! export and its domain is `[0, 0]`. Node domains are encoded as `(0, v)`
//! edges. Absent bounds are the strings `"inf"` / `"-inf"`.

use crate::model::{Edge, EdgeType, ModelError, Stnu, Weight};
use crate::{NodeId, ZERO_ID};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Serialize, Deserialize, Debug)]
struct StnuJson {
    nodes: Vec<NodeJson>,
    constraints: Vec<ConstraintJson>,
}

#[derive(Serialize, Deserialize, Debug)]
struct NodeJson {
    node_id: NodeId,
    min_domain: Extended,
    max_domain: Extended,
}

#[derive(Serialize, Deserialize, Debug)]
struct ConstraintJson {
    first_node: NodeId,
    second_node: NodeId,
    #[serde(rename = "type")]
    kind: String,
    min_duration: Extended,
    max_duration: Extended,
    #[serde(skip_serializing_if = "Option::is_none")]
    distribution: Option<DistributionJson>,
}

#[derive(Serialize, Deserialize, Debug)]
struct DistributionJson {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

/// A JSON number that may also be the literal `"inf"` or `"-inf"`.
#[derive(Serialize, Deserialize, Debug)]
#[serde(untagged)]
enum Extended {
    Num(f64),
    Sym(String),
}

impl Extended {
    fn to_f64(&self) -> Result<f64, ModelError> {
        match self {
            Extended::Num(x) if x.is_finite() => Ok(*x),
            Extended::Num(x) => Err(ModelError::MalformedInput(format!(
                "non-finite numeric bound {x}; use \"inf\"/\"-inf\""
            ))),
            Extended::Sym(s) if s == "inf" => Ok(f64::INFINITY),
            Extended::Sym(s) if s == "-inf" => Ok(f64::NEG_INFINITY),
            Extended::Sym(s) => Err(ModelError::MalformedInput(format!("unknown bound literal {s:?}"))),
        }
    }

    fn from_upper(w: Weight) -> Extended {
        match w {
            Weight::Finite(x) => Extended::Num(x),
            Weight::PosInf => Extended::Sym("inf".to_string()),
        }
    }

    /// Lower bound `-Cji`, where an absent `Cji` reads as `-inf`.
    fn from_lower(cji: Weight) -> Extended {
        match cji {
            Weight::Finite(x) => Extended::Num(-x),
            Weight::PosInf => Extended::Sym("-inf".to_string()),
        }
    }
}

/// Parses an STNU from its JSON text.
pub fn from_json_str(text: &str) -> Result<Stnu, ModelError> {
    let raw: StnuJson =
        serde_json::from_str(text).map_err(|e| ModelError::MalformedInput(e.to_string()))?;

    let mut stnu = Stnu::new();
    stnu.add_vertex(ZERO_ID);
    for node in &raw.nodes {
        stnu.add_vertex(node.node_id);
    }

    for c in &raw.constraints {
        let kind = match c.kind.as_str() {
            "stc" => EdgeType::Requirement,
            "stcu" | "pstc" => EdgeType::Contingent,
            other => {
                return Err(ModelError::MalformedInput(format!("unknown constraint type {other:?}")))
            }
        };
        let lb = c.min_duration.to_f64()?;
        let ub = c.max_duration.to_f64()?;
        let distribution = c.distribution.as_ref().map(|d| d.name.clone());
        stnu.add_edge(c.first_node, c.second_node, lb, ub, kind, distribution)?;
    }

    // Node domains become origin edges. A domain on the sink of an origin
    // constraint is the same pair seen from the export side: keep the
    // constraint and only tighten requirement bounds.
    for node in &raw.nodes {
        if node.node_id == ZERO_ID {
            continue;
        }
        let lb = node.min_domain.to_f64()?;
        let ub = node.max_domain.to_f64()?;
        if lb == f64::NEG_INFINITY && ub == f64::INFINITY {
            continue;
        }
        match stnu.edge(ZERO_ID, node.node_id).map(Edge::is_contingent) {
            None => stnu.add_requirement(ZERO_ID, node.node_id, lb.max(0.0), ub)?,
            Some(false) => {
                stnu.update_edge(ZERO_ID, node.node_id, ub, false);
                stnu.update_edge(node.node_id, ZERO_ID, -lb, false);
            }
            Some(true) => {} // domain of a contingent sink is derived information
        }
    }
    Ok(stnu)
}

/// Serializes an STNU back to the JSON text shape.
pub fn to_json_string(stnu: &Stnu) -> Result<String, ModelError> {
    let mut nodes = Vec::new();
    for v in stnu.verts() {
        if v == ZERO_ID {
            continue;
        }
        nodes.push(NodeJson {
            node_id: v,
            min_domain: Extended::from_lower(stnu.get_edge_weight(v, ZERO_ID)),
            max_domain: Extended::from_upper(stnu.get_edge_weight(ZERO_ID, v)),
        });
    }

    let mut constraints = Vec::new();
    for e in stnu.edges() {
        if e.from == ZERO_ID {
            continue;
        }
        let kind = match (e.kind, &e.distribution) {
            (EdgeType::Requirement, _) => "stc",
            (EdgeType::Contingent, Some(_)) => "pstc",
            (EdgeType::Contingent, None) => "stcu",
        };
        constraints.push(ConstraintJson {
            first_node: e.from,
            second_node: e.to,
            kind: kind.to_string(),
            min_duration: Extended::from_lower(e.cji),
            max_duration: Extended::from_upper(e.cij),
            distribution: e.distribution.as_ref().map(|name| DistributionJson {
                name: name.clone(),
                kind: "Empirical".to_string(),
            }),
        });
    }

    serde_json::to_string_pretty(&StnuJson { nodes, constraints })
        .map_err(|e| ModelError::MalformedInput(e.to_string()))
}

/// Loads an STNU from a JSON file.
pub fn load_stnu(path: impl AsRef<Path>) -> Result<Stnu, ModelError> {
    let text = std::fs::read_to_string(path.as_ref())
        .map_err(|e| ModelError::MalformedInput(format!("{}: {e}", path.as_ref().display())))?;
    from_json_str(&text)
}

/// Writes an STNU to a JSON file.
pub fn save_stnu(stnu: &Stnu, path: impl AsRef<Path>) -> Result<(), ModelError> {
    let text = to_json_string(stnu)?;
    std::fs::write(path.as_ref(), text)
        .map_err(|e| ModelError::MalformedInput(format!("{}: {e}", path.as_ref().display())))
}
