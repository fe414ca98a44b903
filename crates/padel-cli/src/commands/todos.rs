use padel_core::form::{FormState, TodoDraft};

use crate::cli::TodoCommands;
use crate::commands::common::{
    format_todo_lines, open_context, resolve_record_id, short_id, CliContext, TodoListItem,
};
use crate::commands::watch::{run_watch, WatchTarget};
use crate::error::CliError;

pub async fn run_todos(command: TodoCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    if let TodoCommands::Watch = command {
        return run_watch(global_profile, WatchTarget::Todos).await;
    }

    let context = open_context(global_profile)?;
    context.require_identity().await?;
    match command {
        TodoCommands::List { json } => run_list(&context, json).await,
        TodoCommands::Add { title } => {
            let title = normalize_title(&title.join(" "))?;
            let mut form = FormState::<TodoDraft>::default();
            form.open();
            form.set_field("title", &title)?;
            let result = form.submit(&context.todos()).await;
            let record = result.map_err(|error| {
                CliError::Save(form.error.take().unwrap_or_else(|| error.to_string()))
            })?;
            println!("{}", record.id);
            Ok(())
        }
        TodoCommands::Toggle { id } => {
            let todos = context.todos();
            todos.fetch().await?;
            let id = resolve_record_id(&todos.records(), &id)?;
            todos.toggle(&id).await?;
            let done = todos
                .records()
                .iter()
                .find(|todo| todo.id == id)
                .is_some_and(|todo| todo.is_complete);
            println!("{}  {}", short_id(&id), if done { "done" } else { "open" });
            Ok(())
        }
        TodoCommands::Delete { id } => {
            let todos = context.todos();
            todos.fetch().await?;
            let id = resolve_record_id(&todos.records(), &id)?;
            todos.delete(&id).await?;
            println!("{id}");
            Ok(())
        }
        TodoCommands::Watch => run_watch(global_profile, WatchTarget::Todos).await,
    }
}

async fn run_list(context: &CliContext, as_json: bool) -> Result<(), CliError> {
    let todos = context.todos();
    todos.fetch().await?;
    let records = todos.records();
    if as_json {
        let items = records.iter().map(TodoListItem::from).collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if records.is_empty() {
        println!("Nothing to do.");
    } else {
        for line in format_todo_lines(&records) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn normalize_title(title: &str) -> Result<String, CliError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyTitle)
    } else {
        Ok(trimmed.to_string())
    }
}
