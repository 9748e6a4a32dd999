//! DOT rendering of a scheduled operator list.
//!
//! Operators are labeled `"<position>:<op type>"` so the chosen order can
//! be read directly off the plot; edges follow the original graph's
//! dependencies. Only the `.dot` text is produced; rendering it to an
//! image is left to external tooling.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::graph::{Graph, OpId, ValueUse};

/// Accumulates vertices and edges of a DOT digraph.
pub struct DotBuilder {
    name: String,
    body: String,
}

impl DotBuilder {
    pub fn new(name: &str) -> Self {
        DotBuilder {
            name: name.to_string(),
            body: String::new(),
        }
    }

    pub fn node(&mut self, id: &str, label: &str) {
        writeln!(self.body, "    {} [label=\"{}\"];", id, escape(label))
            .expect("writing to string cannot fail");
    }

    pub fn edge(&mut self, from: &str, to: &str) {
        writeln!(self.body, "    {} -> {};", from, to).expect("writing to string cannot fail");
    }

    pub fn finish(self) -> String {
        format!("digraph \"{}\" {{\n{}}}\n", escape(&self.name), self.body)
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Renders `sched` as a DOT digraph over `graph`'s dependencies.
pub fn schedule_dot(sched: &[OpId], graph: &Graph, name: &str) -> String {
    assert_eq!(
        sched.len(),
        graph.num_ops(),
        "schedule must cover every operator"
    );

    let mut dot = DotBuilder::new(name);
    for (idx, &input) in graph.inputs.iter().enumerate() {
        dot.node(&format!("in{idx}"), &graph.value(input).name);
    }
    for (pos, &op) in sched.iter().enumerate() {
        dot.node(
            &format!("op{}", op.0),
            &format!("{}:{}", pos, graph.op(op).ty),
        );
    }
    for (idx, &output) in graph.outputs.iter().enumerate() {
        dot.node(&format!("out{idx}"), &graph.value(output).name);
    }

    for (idx, &input) in graph.inputs.iter().enumerate() {
        for use_site in &graph.value(input).uses {
            if let ValueUse::Op(user) = use_site {
                dot.edge(&format!("in{idx}"), &format!("op{}", user.0));
            }
        }
    }
    for &op in sched {
        for &pred in &graph.op(op).preds {
            dot.edge(&format!("op{}", pred.0), &format!("op{}", op.0));
        }
    }
    for (idx, &output) in graph.outputs.iter().enumerate() {
        if let Some(def) = graph.value(output).def {
            dot.edge(&format!("op{}", def.0), &format!("out{idx}"));
        }
    }

    dot.finish()
}

/// Writes the DOT rendering of `sched` to `<dir>/<name>.dot` and returns
/// the path.
pub fn plot_schedule(sched: &[OpId], graph: &Graph, dir: &Path, name: &str) -> io::Result<PathBuf> {
    let path = dir.join(format!("{name}.dot"));
    fs::write(&path, schedule_dot(sched, graph, name))?;
    Ok(path)
}
