//! Terminal presentation of task updates.

use offload_core::{TaskStatus, TaskTemplate};

/// Tracks what has already been shown so repeated polls stay quiet.
#[derive(Debug, Default)]
pub struct ProgressRenderer {
    last_stage: Option<String>,
    last_log: Option<String>,
}

/// What to do with one observation.
#[derive(Debug, PartialEq, Eq)]
pub enum Rendered {
    /// Progress lines for stderr; empty when nothing changed.
    Progress(Vec<String>),
    /// Final output for stdout.
    Output(String),
    Failed(String),
}

impl ProgressRenderer {
    pub fn render(&mut self, template: &dyn TaskTemplate, status: &TaskStatus) -> Rendered {
        match status {
            TaskStatus::Pending { stage, log } => {
                let mut lines = Vec::new();
                if stage.is_some() && *stage != self.last_stage {
                    self.last_stage = stage.clone();
                    if let Some(stage) = stage {
                        lines.push(format!("status: {stage}"));
                    }
                }
                if log.is_some() && *log != self.last_log {
                    // The server sends the whole log each time; print only what is new.
                    let previous = self.last_log.as_deref().unwrap_or_default();
                    if let Some(log) = log {
                        let fresh = log.strip_prefix(previous).unwrap_or(log);
                        lines.extend(fresh.lines().map(str::to_string));
                    }
                    self.last_log = log.clone();
                }
                Rendered::Progress(lines)
            }
            TaskStatus::Completed { output } => Rendered::Output(template.render_output(output)),
            TaskStatus::Failed { error } => Rendered::Failed(error.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offload_core::ShellTemplate;
    use serde_json::json;

    fn pending(stage: Option<&str>, log: Option<&str>) -> TaskStatus {
        TaskStatus::Pending {
            stage: stage.map(str::to_string),
            log: log.map(str::to_string),
        }
    }

    #[test]
    fn test_stage_changes_only() {
        let template = ShellTemplate::default();
        let mut renderer = ProgressRenderer::default();
        assert_eq!(
            renderer.render(&template, &pending(Some("queued"), None)),
            Rendered::Progress(vec!["status: queued".to_string()])
        );
        assert_eq!(
            renderer.render(&template, &pending(Some("queued"), None)),
            Rendered::Progress(vec![])
        );
        assert_eq!(
            renderer.render(&template, &pending(Some("running"), None)),
            Rendered::Progress(vec!["status: running".to_string()])
        );
    }

    #[test]
    fn test_log_is_printed_incrementally() {
        let template = ShellTemplate::default();
        let mut renderer = ProgressRenderer::default();
        assert_eq!(
            renderer.render(&template, &pending(None, Some("step 1\n"))),
            Rendered::Progress(vec!["step 1".to_string()])
        );
        assert_eq!(
            renderer.render(&template, &pending(None, Some("step 1\nstep 2\n"))),
            Rendered::Progress(vec!["step 2".to_string()])
        );
        // A replaced log is shown in full.
        assert_eq!(
            renderer.render(&template, &pending(None, Some("fresh"))),
            Rendered::Progress(vec!["fresh".to_string()])
        );
    }

    #[test]
    fn test_terminal_statuses() {
        let template = ShellTemplate::default();
        let mut renderer = ProgressRenderer::default();
        assert_eq!(
            renderer.render(
                &template,
                &TaskStatus::Completed {
                    output: json!("{\"stdout\":\"hi\\n\"}")
                }
            ),
            Rendered::Output("hi\n".to_string())
        );
        assert_eq!(
            renderer.render(
                &template,
                &TaskStatus::Failed {
                    error: "boom".to_string()
                }
            ),
            Rendered::Failed("boom".to_string())
        );
    }
}
