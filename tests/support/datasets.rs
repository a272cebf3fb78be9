use std::path::Path;

use crossfold::dataset::RecordTable;
use serde_json::{Map, Value, json};

/// Column group written as one JSONL file.
pub struct Group<'a> {
    pub name: &'a str,
    pub columns: Vec<(&'a str, Vec<f64>)>,
}

/// Write a dataset directory: `manifest.json` plus one `<group>.jsonl` per group.
pub fn write_dataset(dir: &Path, groups: &[Group<'_>]) {
    std::fs::create_dir_all(dir).unwrap();
    let mut manifest_groups = Map::new();
    for group in groups {
        let file = format!("{}.jsonl", group.name);
        let rows = group.columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut text = String::new();
        for row in 0..rows {
            let mut record = Map::new();
            for (name, values) in &group.columns {
                record.insert(name.to_string(), json!(values[row]));
            }
            text.push_str(&Value::Object(record).to_string());
            text.push('\n');
        }
        std::fs::write(dir.join(&file), text).unwrap();
        manifest_groups.insert(group.name.to_string(), Value::String(file));
    }
    let manifest = json!({ "format_version": 1, "groups": manifest_groups });
    std::fs::write(dir.join("manifest.json"), manifest.to_string()).unwrap();
}

/// Synthetic events: `evt` cycles the folds, `x` and `flavour` drive the target.
pub struct Events {
    pub evt: Vec<f64>,
    pub run: Vec<f64>,
    pub x: Vec<f64>,
    pub flavour: Vec<f64>,
    pub mass: Vec<f64>,
    pub target: Vec<f64>,
    pub weight: Vec<f64>,
}

impl Events {
    pub fn generate(n: usize) -> Self {
        let mut events = Events {
            evt: Vec::with_capacity(n),
            run: Vec::with_capacity(n),
            x: Vec::with_capacity(n),
            flavour: Vec::with_capacity(n),
            mass: Vec::with_capacity(n),
            target: Vec::with_capacity(n),
            weight: Vec::with_capacity(n),
        };
        for i in 0..n {
            let x = ((i * 37) % 101) as f64 / 10.0;
            let flavour = (i % 3) as f64;
            events.evt.push(i as f64);
            events.run.push(7.0);
            events.x.push(x);
            events.flavour.push(flavour);
            events.mass.push(100.0 + (i % 50) as f64);
            events.target.push(if x + flavour > 6.0 { 1.0 } else { 0.0 });
            events.weight.push(1.0);
        }
        events
    }

    /// Write the events with the `cont_features` / `cat_features` / `misc_features` /
    /// `targets` layout, rows in the order given by `rows`.
    pub fn write(&self, dir: &Path, rows: &[usize]) {
        let pick = |values: &[f64]| rows.iter().map(|&row| values[row]).collect::<Vec<_>>();
        write_dataset(
            dir,
            &[
                Group {
                    name: "cont_features",
                    columns: vec![("x", pick(&self.x))],
                },
                Group {
                    name: "cat_features",
                    columns: vec![("flavour", pick(&self.flavour))],
                },
                Group {
                    name: "misc_features",
                    columns: vec![
                        ("evt", pick(&self.evt)),
                        ("run", pick(&self.run)),
                        ("mass", pick(&self.mass)),
                    ],
                },
                Group {
                    name: "targets",
                    columns: vec![("target", pick(&self.target)), ("weight", pick(&self.weight))],
                },
            ],
        );
    }

    pub fn len(&self) -> usize {
        self.evt.len()
    }
}

/// In-memory table with a grouping column `g`, a feature `x` and a `target`.
pub fn grouped_table(groups: &[i64], targets: &[f64]) -> RecordTable {
    RecordTable::from_columns(
        vec![
            ("g".to_string(), groups.iter().map(|&g| g as f64).collect()),
            ("x".to_string(), (0..groups.len()).map(|i| i as f64).collect()),
            ("target".to_string(), targets.to_vec()),
        ],
        &[],
    )
    .unwrap()
}
