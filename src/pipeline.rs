//! The irregular ETL workflow: load, clean, roll, compare, reduce.
//!
//! Files are loaded and cleaned against a reference dataset, a sliding window
//! rolls neighbouring files together, randomly chosen pairs of rolled windows
//! are compared, and every comparison is reduced to a single summary. The
//! random pairing is what makes the graph irregular: it can't be written as
//! a map followed by a group-by.
//!
//! The task bodies are stand-ins. They derive their numbers from a hash of
//! the data source identifier and can be made to sleep, so the shape and the
//! timing of the graph are realistic while nothing is read from disk.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::blueprint::Blueprint;
use crate::core::{Hash32, TaskContext};
use crate::engine::Delayed;
use crate::error::GraphError;

/// Number of values in every loaded dataset.
pub const DATASET_LEN: usize = 16;

/// Settings of the workflow.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of files to load.
    pub files: usize,
    /// Width of the rolling window over cleaned files.
    pub window: usize,
    /// Number of random comparisons between rolled windows.
    pub samples: usize,
    /// Seed of the blueprint's sampler; random when absent.
    pub seed: Option<u64>,
    /// Upper bound of the simulated work of a single task.
    pub max_delay_ms: u64,
    /// Directory the file identifiers are placed in.
    pub data_dir: Option<String>,
    /// Source of the reference dataset.
    pub sql_uri: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            files: 10,
            window: 3,
            samples: 20,
            seed: None,
            max_delay_ms: 0,
            data_dir: None,
            sql_uri: String::from("sql://some/uri"),
        }
    }
}

impl PipelineConfig {
    /// A blueprint seeded from the configuration.
    pub fn blueprint(&self) -> Blueprint {
        match self.seed {
            Some(seed) => Blueprint::with_seed(seed),
            None => Blueprint::new(),
        }
    }

    /// Identifier of the `i`-th file.
    pub fn file(&self, i: usize) -> String {
        match &self.data_dir {
            Some(dir) => format!("{}/myfile.{i}.data", dir.trim_end_matches('/')),
            None => format!("myfile.{i}.data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    pub source: String,
    pub values: Vec<f64>,
}

impl Dataset {
    pub fn mean(&self) -> f64 {
        mean(self.values.iter().copied())
    }
}

/// Summary statistics of every comparison score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    pub max: f64,
}

fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));

    if count == 0 { 0.0 } else { sum / count as f64 }
}

fn synthesize(source: &str, salt: &str) -> Dataset {
    let hash = Hash32::hash(format!("{salt}:{source}"));
    let values = hash
        .as_bytes()
        .chunks_exact(2)
        .take(DATASET_LEN)
        .map(|pair| f64::from(u16::from_le_bytes([pair[0], pair[1]])) / f64::from(u16::MAX))
        .collect();

    Dataset {
        source: source.to_string(),
        values,
    }
}

/// Reads a file.
pub fn load(source: &str) -> anyhow::Result<Dataset> {
    if source.trim().is_empty() {
        anyhow::bail!("Empty data source identifier");
    }

    Ok(synthesize(source, "file"))
}

/// Reads the reference dataset from a database.
pub fn load_from_sql(uri: &str) -> anyhow::Result<Dataset> {
    if !uri.starts_with("sql://") {
        anyhow::bail!("Unsupported database URI '{uri}', expected sql://");
    }

    Ok(synthesize(uri, "sql"))
}

/// Centers a dataset on the mean of the reference.
pub fn process(data: &Dataset, reference: &Dataset) -> Dataset {
    let offset = reference.mean();

    Dataset {
        source: data.source.clone(),
        values: data.values.iter().map(|v| v - offset).collect(),
    }
}

/// Element-wise mean of the datasets of one window, truncated to the
/// shortest of them.
pub fn roll(window: &[&Dataset]) -> Dataset {
    let len = window.iter().map(|d| d.values.len()).min().unwrap_or(0);
    let values = (0..len)
        .map(|i| mean(window.iter().map(|d| d.values[i])))
        .collect();

    let source = window
        .iter()
        .map(|d| d.source.as_str())
        .collect::<Vec<_>>()
        .join("+");

    Dataset { source, values }
}

/// Mean absolute difference between two datasets.
pub fn compare(a: &Dataset, b: &Dataset) -> f64 {
    mean(a.values.iter().zip(&b.values).map(|(x, y)| (x - y).abs()))
}

pub fn reduction(scores: impl IntoIterator<Item = f64>) -> Summary {
    let mut count = 0;
    let mut sum = 0.0;
    let mut max = f64::NEG_INFINITY;

    for score in scores {
        count += 1;
        sum += score;
        max = max.max(score);
    }

    if count == 0 {
        return Summary {
            count,
            mean: 0.0,
            max: 0.0,
        };
    }

    Summary {
        count,
        mean: sum / count as f64,
        max,
    }
}

fn pause(ctx: &TaskContext, delay: Duration) {
    if !delay.is_zero() {
        tracing::trace!(task = %ctx.key, ?delay, "working");
        std::thread::sleep(delay);
    }
}

/// Every group of handles in the wired workflow.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub loaded: Vec<Delayed<Dataset>>,
    pub reference: Delayed<Dataset>,
    pub processed: Vec<Delayed<Dataset>>,
    pub rolled: Vec<Delayed<Dataset>>,
    pub compared: Vec<Delayed<f64>>,
    pub summary: Delayed<Summary>,
}

impl Pipeline {
    /// Declares the whole workflow in `blueprint`. Nothing runs.
    ///
    /// A window of zero is treated as one.
    pub fn build(blueprint: &mut Blueprint, config: &PipelineConfig) -> Result<Self, GraphError> {
        let max_delay = config.max_delay_ms;
        let delay = |blueprint: &mut Blueprint| {
            if max_delay == 0 {
                Duration::ZERO
            } else {
                Duration::from_millis(blueprint.sampler().range(0..=max_delay))
            }
        };

        let mut loaded = Vec::with_capacity(config.files);
        for i in 0..config.files {
            let source = config.file(i);
            let d = delay(blueprint);
            loaded.push(blueprint.task().name("load").run(move |ctx| {
                pause(ctx, d);
                load(&source)
            })?);
        }

        let reference = {
            let uri = config.sql_uri.clone();
            let d = delay(blueprint);
            blueprint.task().name("load_from_sql").run(move |ctx| {
                pause(ctx, d);
                load_from_sql(&uri)
            })?
        };

        let mut processed = Vec::with_capacity(loaded.len());
        for &data in &loaded {
            let d = delay(blueprint);
            processed.push(
                blueprint
                    .task()
                    .name("process")
                    .depends_on((data, reference))
                    .run(move |ctx, (data, reference)| {
                        pause(ctx, d);
                        Ok(process(data, reference))
                    })?,
            );
        }

        let mut rolled = Vec::new();
        for window in processed.windows(config.window.max(1)) {
            let d = delay(blueprint);
            rolled.push(
                blueprint
                    .task()
                    .name("roll")
                    .depends_on(window.to_vec())
                    .run(move |ctx, window| {
                        pause(ctx, d);
                        Ok(roll(&window))
                    })?,
            );
        }

        let pairs = blueprint.sampler().pairs(&rolled, config.samples);
        let mut compared = Vec::with_capacity(pairs.len());
        for (a, b) in pairs {
            let d = delay(blueprint);
            compared.push(
                blueprint
                    .task()
                    .name("compare")
                    .depends_on((a, b))
                    .run(move |ctx, (a, b)| {
                        pause(ctx, d);
                        Ok(compare(a, b))
                    })?,
            );
        }

        let summary = {
            let d = delay(blueprint);
            blueprint
                .task()
                .name("reduction")
                .depends_on(compared.clone())
                .run(move |ctx, scores| {
                    pause(ctx, d);
                    Ok(reduction(scores.into_iter().copied()))
                })?
        };

        tracing::debug!(
            loaded = loaded.len(),
            rolled = rolled.len(),
            compared = compared.len(),
            "pipeline wired"
        );

        Ok(Self {
            loaded,
            reference,
            processed,
            rolled,
            compared,
            summary,
        })
    }
}
