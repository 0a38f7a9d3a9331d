//! Converts third-party temporal-problem instance files into the STNU
//! JSON shape.
//!
//! The input format names events instead of numbering them and describes
//! durations either by bounds or by a distribution:
//! `{"instances": [{"<name>": [{start_event_name, end_event_name, type,
//! properties}, ...]}]}`. Controllable links become requirement edges,
//! bounded uncontrollable ones contingent edges, and distribution-described
//! links contingent edges spanning `mean ± k * sigma`, the historical
//! values of `k` being 0.5 and 1.5.

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tempo::model::{save_stnu, EdgeType, Stnu};
use tempo::NodeId;
use tracing::info;

/// Convert a dataset instance file to STNU JSON.
#[derive(Debug, Parser)]
#[command(name = "dataset2stnu", rename_all = "kebab-case")]
struct Opt {
    /// The dataset file to convert.
    input: PathBuf,
    /// Output STNU JSON file.
    output: PathBuf,
    /// Name of the instance to extract; defaults to the first one.
    #[arg(long)]
    instance: Option<String>,
    /// How many standard deviations around the mean a distribution-backed
    /// contingent spans.
    #[arg(long, default_value_t = 1.5)]
    sigma_factor: f64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let opt = Opt::parse();

    let text = std::fs::read_to_string(&opt.input)
        .with_context(|| format!("reading {}", opt.input.display()))?;
    let root: Value = serde_json::from_str(&text).context("parsing dataset JSON")?;

    let instances = root
        .get("instances")
        .and_then(Value::as_array)
        .context("dataset has no instances list")?;
    let instance = match &opt.instance {
        Some(name) => instances
            .iter()
            .find_map(|obj| obj.get(name))
            .with_context(|| format!("no instance named {name:?}"))?,
        None => instances
            .first()
            .and_then(|obj| obj.as_object())
            .and_then(|obj| obj.values().next())
            .context("empty instances list")?,
    };
    let links = instance.as_array().context("instance is not a list of links")?;

    let stnu = convert(links, opt.sigma_factor)?;
    save_stnu(&stnu, &opt.output)?;
    info!(
        nodes = stnu.num_verts(),
        edges = stnu.num_edges(),
        "wrote {}",
        opt.output.display()
    );
    Ok(())
}

fn convert(links: &[Value], sigma_factor: f64) -> Result<Stnu> {
    let mut stnu = Stnu::new();
    stnu.add_vertex(0);
    let mut ids: BTreeMap<String, NodeId> = BTreeMap::new();

    for link in links {
        let start = event_id(&mut stnu, &mut ids, link, "start_event_name")?;
        let end = event_id(&mut stnu, &mut ids, link, "end_event_name")?;
        let props = link.get("properties").context("link without properties")?;

        let (mut kind, lb, ub) = match link.get("type").and_then(Value::as_str) {
            Some("controllable") => {
                let lb = number(props, "lb")?;
                let ub = number(props, "ub")?;
                (EdgeType::Requirement, lb, ub)
            }
            Some("uncontrollable_bounded") => {
                let lb = number(props, "lb")?;
                let ub = number(props, "ub")?;
                (EdgeType::Contingent, lb, ub)
            }
            Some("uncontrollable_probabilistic") | Some("uncontrollable") => {
                let dist = props.get("distribution").context("link without distribution")?;
                match dist.get("type").and_then(Value::as_str) {
                    Some("uniform") => {
                        let lb = number(dist, "lb")?;
                        let ub = number(dist, "ub")?;
                        (EdgeType::Contingent, lb, ub)
                    }
                    _ => {
                        let mean = number(dist, "mean")?;
                        let sigma = number(dist, "variance")?.sqrt();
                        (
                            EdgeType::Contingent,
                            mean - sigma_factor * sigma,
                            mean + sigma_factor * sigma,
                        )
                    }
                }
            }
            other => bail!("unknown link type {other:?}"),
        };

        // a contingent hanging off an uncontrollable event degrades to a
        // requirement
        if kind == EdgeType::Contingent && stnu.is_uncontrollable(start) {
            kind = EdgeType::Requirement;
        }
        stnu.add_edge(start, end, lb, ub, kind, None)
            .with_context(|| format!("link {start} -> {end}"))?;
    }
    Ok(stnu)
}

fn event_id(stnu: &mut Stnu, ids: &mut BTreeMap<String, NodeId>, link: &Value, key: &str) -> Result<NodeId> {
    let name = link
        .get(key)
        .and_then(Value::as_str)
        .with_context(|| format!("link without {key}"))?;
    let next = ids.len() as NodeId + 1;
    let id = *ids.entry(name.to_string()).or_insert(next);
    stnu.add_vertex(id);
    Ok(id)
}

fn number(value: &Value, key: &str) -> Result<f64> {
    let field = value.get(key).with_context(|| format!("missing {key}"))?;
    if let Some(x) = field.as_f64() {
        return Ok(x);
    }
    field
        .as_str()
        .and_then(|s| s.parse().ok())
        .with_context(|| format!("{key} is not a number"))
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn link(start: &str, end: &str, body: Value) -> Value {
        let mut base = json!({"start_event_name": start, "end_event_name": end});
        base.as_object_mut().unwrap().extend(body.as_object().unwrap().clone());
        base
    }

    #[test]
    fn test_convert_controllable_and_bounded() {
        let links = vec![
            link("a", "b", json!({"type": "controllable", "properties": {"lb": 1.0, "ub": 4.0}})),
            link("b", "c", json!({"type": "uncontrollable_bounded", "properties": {"lb": 2.0, "ub": 3.0}})),
        ];
        let stnu = convert(&links, 1.5).unwrap();
        assert_eq!(stnu.num_verts(), 4); // origin + three events
        assert_eq!(stnu.contingent_edges().count(), 1);
        let c = stnu.contingent_edges().next().unwrap();
        assert_eq!((c.min_weight(), c.max_weight()), (2.0, 3.0));
    }

    #[test]
    fn test_convert_distribution_uses_sigma_factor() {
        let links = vec![link(
            "a",
            "b",
            json!({"type": "uncontrollable_probabilistic",
                   "properties": {"distribution": {"type": "normal", "mean": 10.0, "variance": 4.0}}}),
        )];
        let stnu = convert(&links, 1.5).unwrap();
        let c = stnu.contingent_edges().next().unwrap();
        assert_eq!((c.min_weight(), c.max_weight()), (7.0, 13.0));

        let stnu = convert(&links, 0.5).unwrap();
        let c = stnu.contingent_edges().next().unwrap();
        assert_eq!((c.min_weight(), c.max_weight()), (9.0, 11.0));
    }

    #[test]
    fn test_contingent_from_uncontrollable_degrades() {
        let links = vec![
            link("a", "b", json!({"type": "uncontrollable_bounded", "properties": {"lb": 1.0, "ub": 2.0}})),
            link("b", "c", json!({"type": "uncontrollable_bounded", "properties": {"lb": 1.0, "ub": 2.0}})),
        ];
        // b is uncontrollable, so the link out of it becomes a requirement
        let stnu = convert(&links, 1.5).unwrap();
        assert_eq!(stnu.contingent_edges().count(), 1);
        assert!(!stnu.edge(2, 3).unwrap().is_contingent());
    }
}
