use stocksync_core::{Article, ArticleChanges, Business, InventoryService};

use crate::cli::ArticleCommands;
use crate::commands::common::{finish, format_article_lines, resolve_record, CliContext};
use crate::error::CliError;

pub async fn run_article(command: ArticleCommands, context: &CliContext) -> Result<(), CliError> {
    let service = context.open_service().await?;
    let result = execute_article(command, &service).await;
    finish(&service).await?;
    result
}

pub async fn execute_article(
    command: ArticleCommands,
    service: &InventoryService,
) -> Result<(), CliError> {
    match command {
        ArticleCommands::Add {
            business,
            name,
            qty,
            price,
        } => {
            let business: Business = resolve_record(service.store(), &business).await?;
            let article = service
                .create_article(&business.id, &name, qty, price)
                .await?;
            println!("{}", article.id);
        }
        ArticleCommands::List { business, json } => {
            let business: Business = resolve_record(service.store(), &business).await?;
            let articles = service.list_articles(&business.id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&articles)?);
            } else if articles.is_empty() {
                println!("No articles for {} yet.", business.name);
            } else {
                for line in format_article_lines(&articles) {
                    println!("{line}");
                }
            }
        }
        ArticleCommands::Update {
            id,
            name,
            qty,
            price,
        } => {
            let changes = ArticleChanges {
                name,
                qty,
                selling_price: price,
            };
            if changes.is_empty() {
                return Err(CliError::NoChanges);
            }
            let article: Article = resolve_record(service.store(), &id).await?;
            let updated = service.update_article(&article.id, changes).await?;
            println!("{}", updated.id);
        }
        ArticleCommands::Delete { id } => {
            let article: Article = resolve_record(service.store(), &id).await?;
            service.delete_article(&article.id).await?;
            println!("{}", article.id);
        }
    }
    Ok(())
}
