//! Request handlers: one [`Command`] in, one [`ControlResponse`] out.
//!
//! Shared by the WebSocket channel and the HTTP routes.  Slot operations
//! touch the filesystem and run on the blocking pool so the control task
//! keeps serving other clients.

use tetra_runtime::Supervisor;
use tetra_store::ModelSlotRegistry;
use tetra_types::{Command, ControlResponse, TetraError};
use tracing::{info, warn};

/// Run `f` against the slot registry on the blocking pool.
async fn with_slots<T, F>(sup: &Supervisor, f: F) -> Result<T, TetraError>
where
    T: Send + 'static,
    F: FnOnce(&ModelSlotRegistry) -> Result<T, tetra_store::StoreError> + Send + 'static,
{
    let slots = sup.slots().clone();
    tokio::task::spawn_blocking(move || f(&slots))
        .await
        .map_err(|e| TetraError::Io(format!("blocking task failed: {e}")))?
        .map_err(TetraError::from)
}

/// Execute `command` and describe the outcome.
pub async fn handle(sup: &Supervisor, command: Command) -> ControlResponse {
    let name = command_name(&command);
    let result = dispatch(sup, command).await;
    match result {
        Ok(response) => {
            info!(command = name, "{}", response.message);
            response
        }
        Err(e) => {
            warn!(command = name, error = %e, "command rejected");
            ControlResponse::fail(e)
        }
    }
}

async fn dispatch(sup: &Supervisor, command: Command) -> Result<ControlResponse, TetraError> {
    let response = match command {
        Command::Start { config } => {
            sup.start_training(config).await?;
            ControlResponse::ok("Training started")
        }
        Command::Stop => {
            sup.stop_training().await?;
            ControlResponse::ok("Session stopped")
        }
        Command::Pause => {
            sup.pause_training().await?;
            ControlResponse::ok("Training paused")
        }
        Command::Resume => {
            sup.resume_training().await?;
            ControlResponse::ok("Training resumed")
        }
        Command::SetMode { visual } => {
            sup.set_mode(visual).await?;
            ControlResponse::ok(if visual { "Mode: visual" } else { "Mode: headless" })
        }
        Command::SetSpeed { speed } => {
            let applied = sup.set_speed(speed).await?;
            ControlResponse::ok(format!("Speed set to {applied:.1}x"))
        }
        Command::DemoStart { slot_name } => {
            sup.start_demo(&slot_name).await?;
            ControlResponse::ok(format!("Demo started: {slot_name}"))
        }
        Command::DemoStop => {
            sup.stop_demo().await?;
            ControlResponse::ok("Demo stopped")
        }
        Command::Status => ControlResponse::ok(sup.status().await.status.to_string()),
        Command::Pong => ControlResponse::ok("pong"),
        Command::ListSlots => {
            let slots = with_slots(sup, |r| r.list()).await?;
            ControlResponse::ok(format!("{} slot(s)", slots.len())).with_slots(slots)
        }
        Command::SaveSlot { source, slot_name } => {
            let name = slot_name.clone();
            let path = with_slots(sup, move |r| r.save(source, &name)).await?;
            ControlResponse::ok(format!("Saved {} checkpoint to slot {slot_name}", source.dir_name()))
                .with_path(path)
        }
        Command::DeleteSlot { slot_name } => {
            let name = slot_name.clone();
            with_slots(sup, move |r| r.delete(&name)).await?;
            ControlResponse::ok(format!("Deleted slot {slot_name}"))
        }
        Command::ExportSlot {
            slot_name,
            destination,
        } => {
            let name = slot_name.clone();
            let path = with_slots(sup, move |r| r.export(&name, &destination)).await?;
            ControlResponse::ok(format!("Exported slot {slot_name} to {}", path.display()))
                .with_path(path)
        }
    };
    Ok(response)
}

pub(crate) fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Start { .. } => "start",
        Command::Stop => "stop",
        Command::Pause => "pause",
        Command::Resume => "resume",
        Command::SetMode { .. } => "set_mode",
        Command::SetSpeed { .. } => "set_speed",
        Command::DemoStart { .. } => "demo_start",
        Command::DemoStop => "demo_stop",
        Command::Status => "status",
        Command::Pong => "pong",
        Command::ListSlots => "list_slots",
        Command::SaveSlot { .. } => "save_slot",
        Command::DeleteSlot { .. } => "delete_slot",
        Command::ExportSlot { .. } => "export_slot",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use tetra_runtime::SupervisorConfig;
    use tetra_sim::SimBackend;
    use tetra_store::CheckpointStore;
    use tetra_types::{
        Backend, CheckpointMetadata, CheckpointSource, SessionStatus, TrainingConfig,
    };

    use super::*;

    fn supervisor(dir: &tempfile::TempDir) -> Supervisor {
        Supervisor::new(
            Arc::new(SimBackend::new()),
            SupervisorConfig {
                checkpoint_dir: dir.path().to_path_buf(),
                ..SupervisorConfig::default()
            },
        )
    }

    fn seed_best(dir: &tempfile::TempDir, best_lines: u32) {
        let config = TrainingConfig {
            seed: Some(5),
            ..TrainingConfig::default()
        };
        let engine = SimBackend::new().create_engine(&config).unwrap();
        let meta = CheckpointMetadata {
            steps_trained: 0,
            episodes: 3,
            exploration_rate: 1.0,
            best_lines,
            config,
            timestamp: Utc::now(),
        };
        CheckpointStore::new(dir.path())
            .save_to(CheckpointSource::Best, engine.as_ref(), &meta)
            .unwrap();
    }

    #[tokio::test]
    async fn saved_slot_is_listed_with_its_best_lines() {
        let dir = tempfile::tempdir().unwrap();
        seed_best(&dir, 12);
        let sup = supervisor(&dir);

        let saved = handle(
            &sup,
            Command::SaveSlot {
                source: CheckpointSource::Best,
                slot_name: "run-1".into(),
            },
        )
        .await;
        assert!(saved.success, "{}", saved.message);
        assert!(saved.path.unwrap().ends_with("slots/run-1"));

        let listed = handle(&sup, Command::ListSlots).await;
        let slots = listed.slots.unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].name, "run-1");
        assert_eq!(slots[0].best_lines, Some(12));
    }

    #[tokio::test]
    async fn deleting_a_missing_slot_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        let response = handle(
            &sup,
            Command::DeleteSlot {
                slot_name: "ghost".into(),
            },
        )
        .await;
        assert!(!response.success);
        assert!(response.message.contains("ghost"));
    }

    #[tokio::test]
    async fn invalid_slot_name_is_rejected_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        seed_best(&dir, 1);
        let sup = supervisor(&dir);
        let response = handle(
            &sup,
            Command::SaveSlot {
                source: CheckpointSource::Best,
                slot_name: "../escape".into(),
            },
        )
        .await;
        assert!(!response.success);
        assert!(!dir.path().join("slots").exists());
        assert!(!dir.path().join("escape").exists());
    }

    #[tokio::test]
    async fn export_copies_weights_out() {
        let dir = tempfile::tempdir().unwrap();
        seed_best(&dir, 4);
        let sup = supervisor(&dir);
        handle(
            &sup,
            Command::SaveSlot {
                source: CheckpointSource::Best,
                slot_name: "keep".into(),
            },
        )
        .await;

        let out = tempfile::tempdir().unwrap();
        let response = handle(
            &sup,
            Command::ExportSlot {
                slot_name: "keep".into(),
                destination: out.path().to_path_buf(),
            },
        )
        .await;
        assert!(response.success, "{}", response.message);
        assert!(out.path().join("keep.weights").is_file());
    }

    #[tokio::test]
    async fn lifecycle_commands_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);

        assert!(!handle(&sup, Command::Pause).await.success);
        assert!(handle(&sup, Command::Start { config: None }).await.success);
        assert_eq!(sup.status().await.status, SessionStatus::Running);

        let again = handle(&sup, Command::Start { config: None }).await;
        assert!(!again.success);
        assert!(again.message.contains("already active"));

        assert!(handle(&sup, Command::Pause).await.success);
        assert_eq!(handle(&sup, Command::Status).await.message, "paused");
        assert!(handle(&sup, Command::Stop).await.success);
        assert_eq!(sup.status().await.status, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn speed_reply_reports_the_clamped_value() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        let response = handle(&sup, Command::SetSpeed { speed: 9.0 }).await;
        assert_eq!(response.message, "Speed set to 1.0x");
        assert_eq!(sup.status().await.speed_factor, 1.0);
    }
}
