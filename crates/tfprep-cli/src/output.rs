use tfprep_reconciler::{Change, ProvisionReport};

/// Render a run report as human-readable text.
pub fn render_report(report: &ProvisionReport) -> String {
    let mut out = String::new();
    for change in &report.changes {
        let line = match change {
            Change::Created { resource } => format!("+ {}", resource),
            Change::AlreadyExists { resource } => format!("= {}", resource),
            Change::ProviderRegistered { namespace, retries } => {
                format!("+ provider {} registered ({} retries)", namespace, retries)
            }
            Change::PolicyUpdated { vault, principal_id } => {
                format!("~ access policy for {} on {}", principal_id, vault)
            }
            Change::PolicyUnchanged { vault, principal_id } => {
                format!("= access policy for {} on {}", principal_id, vault)
            }
            Change::LockCreated { lock } => format!("+ {}", lock),
            Change::LockPresent { lock } => format!("= {}", lock),
        };
        out.push_str(&line);
        out.push('\n');
    }

    if report.is_noop() {
        out.push_str("No changes. Backend already in place.\n");
    } else {
        out.push_str(&format!("{} resource(s) created.\n", report.created()));
    }

    if let Some(finished) = report.finished_at {
        let elapsed = finished - report.started_at;
        out.push_str(&format!("Finished in {}s.\n", elapsed.num_seconds()));
    }
    out
}
