use std::path::Path;

use crate::commands::{async_runtime, load_config, open_migrated, CommandResult, StepFailure};
use nurture_core::documents::{chunk_text, ChunkOptions};
use nurture_core::domain::knowledge::ProjectScope;
use nurture_db::repositories::{PassageRepository, SqlPassageRepository};

/// Chunks a brochure text file and stores it as the passages of `source_id`,
/// replacing whatever that source contributed before.
pub fn run(project: &str, source_id: &str, file: &Path) -> CommandResult {
    let project = project.trim();
    let source_id = source_id.trim();
    if project.is_empty() || source_id.is_empty() {
        return CommandResult::failure(
            "ingest",
            "invalid_input",
            "--project and --source must not be empty",
            7,
        );
    }

    let text = match std::fs::read_to_string(file) {
        Ok(text) => text,
        Err(error) => {
            return CommandResult::failure(
                "ingest",
                "invalid_input",
                format!("could not read `{}`: {error}", file.display()),
                7,
            );
        }
    };
    let chunks = chunk_text(&text, ChunkOptions::default());
    if chunks.is_empty() {
        return CommandResult::failure(
            "ingest",
            "invalid_input",
            format!("`{}` contains no text to ingest", file.display()),
            7,
        );
    }

    let config = match load_config("ingest") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match async_runtime("ingest") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let scope = ProjectScope::new(project);
    let result = runtime.block_on(async {
        let pool = open_migrated(&config).await?;
        let passages = SqlPassageRepository::new(pool.clone());
        let stored = passages
            .replace_source(&scope, source_id, &chunks)
            .await
            .map_err(|error| ("passage_storage", error.to_string(), 8u8))?;
        let total = passages
            .list_for_project(&scope)
            .await
            .map_err(|error| ("passage_storage", error.to_string(), 8u8))?
            .len();
        pool.close().await;
        Ok::<(usize, usize), StepFailure>((stored, total))
    });

    match result {
        Ok((stored, total)) => CommandResult::success(
            "ingest",
            format!(
                "stored {stored} chunks from `{source_id}` for {project} ({total} passages in project)"
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("ingest", error_class, message, exit_code)
        }
    }
}
