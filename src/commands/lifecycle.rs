use crate::output::UserOutput;
use cloudport::container::Caller;
use cloudport::orchestrator::Action;
use cloudport::Orchestrator;

pub async fn run_lifecycle(
    orchestrator: &Orchestrator,
    caller: &Caller,
    id: &str,
    action: Action,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let verb = match action {
        Action::Start => "Starting",
        Action::Stop => "Stopping",
        Action::Restart => "Restarting",
        Action::Remove => "Removing",
    };
    out.progress(&format!("{} {}... ", verb, id));

    let result = match action {
        Action::Start => orchestrator.start(caller, id).await.map(Some),
        Action::Stop => orchestrator.stop(caller, id).await.map(Some),
        Action::Restart => orchestrator.restart(caller, id).await.map(Some),
        Action::Remove => orchestrator.remove(caller, id).await.map(|()| None),
    };

    match result {
        Ok(row) => {
            out.finish_progress("done");
            if json {
                let doc = serde_json::json!({
                    "id": id,
                    "action": action.as_str(),
                    "status": row.as_ref().map(|r| r.status.as_str()),
                });
                out.status(&serde_json::to_string_pretty(&doc)?);
            } else if let Some(row) = row {
                out.success(&format!("{} is {}", row.id, row.status));
            } else {
                out.success(&format!("{} removed", id));
            }
            Ok(())
        }
        Err(e) => {
            out.finish_progress("failed");
            Err(e.into())
        }
    }
}
