use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use text2sql_harness::config::{ApiKeys, AppConfig, CliArgs, Command};
use text2sql_harness::error::Text2SqlError;
use text2sql_harness::eval::{generate_predictions, load_items, BatchGeneration, Evaluator};
use text2sql_harness::llm::models::{LlmConfig, LlmType};
use text2sql_harness::pipeline::{AppContext, PromptRequest, RefineMode, Text2SqlService};
use text2sql_harness::schema::{format_schema, FormatType};
use text2sql_harness::util::logging::{init_tracing, wants_json};
use text2sql_harness::web;
use text2sql_harness::web::state::AppState;

fn exit_with(e: Text2SqlError) -> ! {
    error!("{}", e);
    match serde_json::to_string(&e.to_body()) {
        Ok(body) => eprintln!("{}", body),
        Err(_) => eprintln!("{}", e),
    }
    std::process::exit(1)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    init_tracing(wants_json(&config.log_format));

    let web_config = config.web.clone();
    let eval_timeout = Duration::from_secs(config.eval.timeout_seconds);
    let default_database = config.dataset.default_database.clone();
    let ctx = match AppContext::new(config, ApiKeys::from_env()) {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => exit_with(e),
    };

    match args.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => {
            if let Some(database) = default_database {
                if let Err(e) = ctx.schemas.switch_database(&database).await {
                    // The server still starts; requests can name a database explicitly
                    warn!("Could not load default database {}: {}", database, e);
                }
            }

            let state = Arc::new(AppState::new(ctx));
            info!("Starting text2sql server on {}:{}", web_config.host, web_config.port);
            match web::run_server(web_config, state).await {
                Ok(_) => info!("Server stopped gracefully"),
                Err(e) => {
                    error!("Server error: {}", e);
                    return Err(e.into());
                }
            }
        }
        Command::Prompt {
            database,
            prompt_type,
            question,
            shots,
            evidence,
            format,
        } => {
            let request = PromptRequest {
                prompt_type: prompt_type.parse().unwrap_or_else(|e| exit_with(e)),
                shots,
                question,
                evidence,
                database_name: Some(database),
                schema_format: format
                    .map(|f| f.parse::<FormatType>())
                    .transpose()
                    .unwrap_or_else(|e| exit_with(e)),
                pruned_schema: None,
                examples: None,
            };
            match Text2SqlService::new(ctx).generate_prompt(&request).await {
                Ok(response) => println!("{}", response.prompt),
                Err(e) => exit_with(e),
            }
        }
        Command::Schema { database, format } => {
            let format: FormatType = format.parse().unwrap_or_else(|e| exit_with(e));
            let rendered = match ctx.schemas.load(&database).await {
                Ok(schema) => format_schema(&schema, format, None),
                Err(e) => Err(e),
            };
            match rendered {
                Ok(text) => println!("{}", text),
                Err(e) => exit_with(e),
            }
        }
        Command::Eval {
            input,
            output,
            llm_type,
            model,
            prompt_type,
            shots,
            temperature,
            max_tokens,
            refine_attempts,
        } => {
            let mut items = load_items(&input).unwrap_or_else(|e| exit_with(e));

            if let (Some(llm_type), Some(model)) = (llm_type, model) {
                let llm_type: LlmType = llm_type.parse().unwrap_or_else(|e| exit_with(e));
                let settings = BatchGeneration {
                    llm: LlmConfig::new(llm_type, model, temperature, max_tokens)
                        .unwrap_or_else(|e| exit_with(e)),
                    prompt_type: prompt_type.parse().unwrap_or_else(|e| exit_with(e)),
                    shots,
                    refine_attempts,
                    refine_mode: RefineMode::Chat,
                };
                let mut client = ctx.create_client(&settings.llm).unwrap_or_else(|e| exit_with(e));
                let service = Text2SqlService::new(Arc::clone(&ctx));
                generate_predictions(&service, client.as_mut(), &settings, &mut items).await;
            }

            let report = Evaluator::new(ctx.schemas.paths().clone(), eval_timeout)
                .evaluate(&items)
                .await;
            print!("{}", report);

            if let Some(path) = output {
                let written = serde_json::to_string_pretty(&report)
                    .map_err(|e| Text2SqlError::Internal(e.to_string()))
                    .and_then(|json| {
                        std::fs::write(&path, json).map_err(|e| {
                            Text2SqlError::InvalidInput(format!("cannot write {}: {}", path.display(), e))
                        })
                    });
                match written {
                    Ok(()) => info!("Wrote evaluation report to {}", path.display()),
                    Err(e) => exit_with(e),
                }
            }
        }
    }

    Ok(())
}
