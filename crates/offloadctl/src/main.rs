mod cli;
mod render;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Cli, Command, HistoryArgs};
use futures::StreamExt;
use offload_core::{
    ClientConfig, FileBackend, HistoryStore, HttpTransport, LlmTemplate, RawTemplate,
    ShellTemplate, TaskLifecycleClient, TaskStatus, TaskTemplate, TaskUpdates,
};
use render::{ProgressRenderer, Rendered};
use std::io::Write;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("offloadctl=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli).await?;

    let history = match HistoryStore::load(Box::new(FileBackend::new(config.state_dir.clone()))).await {
        Ok(history) => history,
        Err(e) => {
            tracing::warn!(
                "Failed to load history from {}: {}",
                config.state_dir.display(),
                e
            );
            HistoryStore::in_memory()
        }
    };

    if let Command::History(args) = &cli.command {
        print_history(&history, args);
        return Ok(());
    }

    let transport = Arc::new(HttpTransport::from_config(&config)?);
    tracing::debug!("Using queue at {}", transport.base_url());
    let (client, updates) = TaskLifecycleClient::new(transport, config.api_key.clone(), history);
    let mut client = client.with_poll_interval(config.poll_interval());

    match cli.command {
        Command::Submit(args) => {
            let template = ShellTemplate::new(args.capability);
            let command = args.command.join(" ");
            if args.detach {
                let task = client.submit(&template, &command).await?;
                println!("{task}");
                return Ok(());
            }
            follow(&mut client, updates, &template, &command).await
        }
        Command::Prompt(args) => {
            let template = LlmTemplate::new(&args.model);
            let prompt = args.prompt.join(" ");
            if args.blocking {
                blocking(&mut client, &template, &prompt).await
            } else {
                follow(&mut client, updates, &template, &prompt).await
            }
        }
        Command::Run(args) => {
            let template = RawTemplate::new(args.capability);
            if args.blocking {
                blocking(&mut client, &template, &args.payload).await
            } else {
                follow(&mut client, updates, &template, &args.payload).await
            }
        }
        Command::Capabilities => {
            for capability in client.capabilities().await? {
                println!("{capability}");
            }
            Ok(())
        }
        Command::History(_) => Ok(()),
    }
}

/// Config file, then environment, then command-line flags.
async fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| ClientConfig::default_state_dir().join("config.yaml"));
    let mut config = ClientConfig::load(&path)
        .await
        .with_context(|| format!("loading {}", path.display()))?;
    config.apply_env();
    if let Some(server) = &cli.server {
        config.server_url = Some(server.clone());
    }
    if let Some(key) = &cli.api_key {
        config.api_key = key.clone();
    }
    Ok(config)
}

/// Submit in the background and print progress until the task settles or Ctrl-C.
async fn follow(
    client: &mut TaskLifecycleClient,
    mut updates: TaskUpdates,
    template: &dyn TaskTemplate,
    input: &str,
) -> Result<()> {
    let task = client.submit_and_watch(template, input).await?;
    eprintln!("submitted {task}");

    let mut renderer = ProgressRenderer::default();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                client.cancel();
                eprintln!("stopped watching {task}; it may still be running on the server");
                return Ok(());
            }
            update = updates.next() => {
                let Some(update) = update else {
                    bail!("update stream closed while watching {task}");
                };
                match renderer.render(template, &update.status) {
                    Rendered::Progress(lines) => {
                        for line in lines {
                            eprintln!("{line}");
                        }
                    }
                    Rendered::Output(text) => return print_output(&text),
                    Rendered::Failed(error) => bail!("task {task} failed: {error}"),
                }
            }
        }
    }
}

async fn blocking(
    client: &mut TaskLifecycleClient,
    template: &dyn TaskTemplate,
    input: &str,
) -> Result<()> {
    match client.submit_blocking(template, input).await? {
        TaskStatus::Completed { output } => print_output(&template.render_output(&output)),
        TaskStatus::Failed { error } => bail!("task failed: {error}"),
        TaskStatus::Pending { .. } => bail!("server returned before the task finished"),
    }
}

fn print_output(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}

fn print_history(history: &HistoryStore, args: &HistoryArgs) {
    let prefix = args.prefix.as_deref().unwrap_or_default();
    for command in history.commands().suggestions(prefix) {
        println!("{command}");
    }
    if args.tasks {
        println!();
        for task in history.issued().entries() {
            println!("{task}");
        }
    }
}
