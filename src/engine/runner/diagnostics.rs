use std::collections::HashMap;
use std::fmt::Write;
use std::time::Duration;

use petgraph::graph::NodeIndex;

use crate::TaskGraph;
use crate::engine::TaskExecution;

/// Evaluation diagnostics and performance metrics.
///
/// Returned as part of every [`Outcome`](crate::Outcome); contains the start
/// time and duration of each task that actually ran.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    /// A map of task node indices to their execution metrics.
    pub execution_times: HashMap<NodeIndex, TaskExecution>,
}

impl Diagnostics {
    /// Number of tasks that actually ran.
    pub fn executed(&self) -> usize {
        self.execution_times.len()
    }

    /// Sum of the durations of every task that ran.
    pub fn busy_time(&self) -> Duration {
        self.execution_times.values().map(|t| t.duration).sum()
    }

    /// Wall time from the first task start to the last task end.
    pub fn wall_time(&self) -> Duration {
        let start = self.execution_times.values().map(|t| t.start).min();
        let end = self
            .execution_times
            .values()
            .map(|t| t.start + t.duration)
            .max();

        match (start, end) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// Renders the task graph as a Mermaid diagram, color-coded by execution duration.
    ///
    /// * **Green**: Fast
    /// * **Yellow**: Moderate
    /// * **Red**: Slow
    /// * **Grey**: Did not run (failed upstream, cancelled, or not requested)
    pub fn render_mermaid(&self, graph: &TaskGraph) -> String {
        let mut f = String::new();
        let _ = writeln!(f, "graph LR");

        let times = &self.execution_times;
        let mut min_time = f64::MAX;
        let mut max_time = f64::MIN;

        for t in times.values() {
            let secs = t.duration.as_secs_f64();
            min_time = min_time.min(secs);
            max_time = max_time.max(secs);
        }

        if min_time > max_time {
            // No tasks ran
            min_time = 0.0;
            max_time = 0.0;
        }

        // Avoid divide by zero if all tasks took same time
        if (max_time - min_time).abs() < f64::EPSILON {
            max_time = min_time + 1.0;
        }

        for index in graph.graph.node_indices() {
            let node = &graph.graph[index];
            let name = node.name.replace('"', "\\\"");

            let (label_extra, color_code) = match times.get(&index) {
                Some(exec) => {
                    let t = (exec.duration.as_secs_f64() - min_time) / (max_time - min_time);
                    (format!("{:.2?}", exec.duration), heat(t))
                }
                None => ("not run".to_string(), "#D3D3D3".to_string()),
            };

            let _ = writeln!(f, "    {}[\"{}\\n{}\"]", index.index(), name, label_extra);
            let _ = writeln!(f, "    style {} fill:{}", index.index(), color_code);
        }

        for edge in graph.graph.raw_edges() {
            let _ = writeln!(
                f,
                "    {} --> {}",
                edge.source().index(),
                edge.target().index()
            );
        }

        f
    }
}

/// Maps `t` in `0.0..=1.0` onto green, yellow, red.
fn heat(t: f64) -> String {
    let t = t.clamp(0.0, 1.0);

    let (r, g, b) = if t < 0.5 {
        ((255.0 * t * 2.0) as u8, 255, 0)
    } else {
        (255, (255.0 * (1.0 - (t - 0.5) * 2.0)) as u8, 0)
    };

    format!("#{r:02X}{g:02X}{b:02X}")
}
