use stocksync_core::{Business, InventoryService};

use crate::cli::BusinessCommands;
use crate::commands::common::{
    finish, format_business_lines, resolve_name, resolve_record, CliContext,
};
use crate::error::CliError;

pub async fn run_business(command: BusinessCommands, context: &CliContext) -> Result<(), CliError> {
    let service = context.open_service().await?;
    let result = execute_business(command, &service).await;
    finish(&service).await?;
    result
}

pub async fn execute_business(
    command: BusinessCommands,
    service: &InventoryService,
) -> Result<(), CliError> {
    match command {
        BusinessCommands::Add { name } => {
            let business = service.create_business(&resolve_name(&name)?).await?;
            println!("{}", business.id);
        }
        BusinessCommands::List { json } => {
            let businesses = service.list_businesses().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&businesses)?);
            } else if businesses.is_empty() {
                println!("No businesses yet.");
            } else {
                for line in format_business_lines(&businesses) {
                    println!("{line}");
                }
            }
        }
        BusinessCommands::Rename { id, name } => {
            let name = resolve_name(&name)?;
            let business: Business = resolve_record(service.store(), &id).await?;
            let renamed = service.rename_business(&business.id, &name).await?;
            println!("{}", renamed.id);
        }
        BusinessCommands::Delete { id } => {
            let business: Business = resolve_record(service.store(), &id).await?;
            let articles = service.delete_business(&business.id).await?;
            println!("{}", business.id);
            if articles > 0 {
                eprintln!("Deleted {articles} articles with it");
            }
        }
    }
    Ok(())
}
