use std::fmt::Write;

use super::Task;

/// Walks a task DAG from the root towards the sources.
///
/// `enter`/`leave` bracket a task and everything below it; `visit` sees the task
/// itself. A fold's replanned subtree is walked after its parents.
pub trait TaskVisitor {
    fn enter(&mut self, _task: &Task) {}

    fn visit(&mut self, task: &Task);

    fn leave(&mut self, _task: &Task) {}
}

/// Renders one indented line per task.
#[derive(Debug, Default)]
pub struct ExplainVisitor {
    depth: usize,
    out: String,
}

impl ExplainVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> String {
        self.out
    }
}

impl TaskVisitor for ExplainVisitor {
    fn enter(&mut self, _task: &Task) {
        self.depth += 1;
    }

    fn visit(&mut self, task: &Task) {
        let pad = "  ".repeat(self.depth.saturating_sub(1));
        let ops = task
            .operators()
            .iter()
            .map(|op| op.name())
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(
            self.out,
            "{pad}{}#{} [{}] ops=[{ops}]",
            task.kind(),
            task.id(),
            task.node().executor_names().join(" -> "),
        );
        if task.replanned().is_some() {
            self.out.push_str(" replanned");
        }
        self.out.push('\n');
    }

    fn leave(&mut self, _task: &Task) {
        self.depth -= 1;
    }
}

pub fn explain_tasks(root: &Task) -> String {
    let mut v = ExplainVisitor::new();
    root.accept(&mut v);
    v.finish()
}
