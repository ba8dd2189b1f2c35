pub mod catalog;
pub mod protocol;

use crate::app::App;
use crate::errors::ToolError;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;

/// Line-delimited JSON dispatcher over stdio. Requests run on parallel
/// tasks; responses funnel through one writer and may interleave in
/// completion order. The process ends when stdin closes.
pub struct Server {
    app: Arc<App>,
}

impl Server {
    pub fn new() -> Result<Self, ToolError> {
        let app = App::initialize()?;
        app.start_background_tasks();
        Ok(Self { app: Arc::new(app) })
    }

    pub fn with_app(app: Arc<App>) -> Self {
        Self { app }
    }

    pub async fn dispatch(app: &App, tool: &str, args: &Value) -> Result<Value, ToolError> {
        catalog::validate(tool, args)?;
        match tool {
            "auth_store_credentials" => app.ssh_manager.store_credentials(args),
            "ssh_execute" => app.ssh_manager.execute(args).await,
            "ssh_execute_batch" => app.ssh_manager.execute_batch(args).await,
            "ssh_execute_script" => app.ssh_manager.execute_script(args).await,
            "ssh_system_info" => app.ssh_manager.system_info(args).await,
            "ssh_search_content" => app.ssh_manager.search_content(args).await,
            "ssh_health_check" => app.ssh_manager.health_check(args).await,
            "ssh_session_info" => Ok(app.ssh_manager.session_info()),
            "ssh_clear_cache" => app.ssh_manager.clear_cache(args),
            "file_upload" => app.transfer_manager.upload(args).await,
            "file_download" => app.transfer_manager.download(args).await,
            "file_info" => app.transfer_manager.file_info(args).await,
            "dir_list" => app.directory_manager.list(args).await,
            "dir_interactive" => app.directory_manager.interactive(args).await,
            other => Err(ToolError::config(format!("Unknown tool {:?}", other))),
        }
    }

    pub async fn run_stdio(&self) -> Result<(), ToolError> {
        let stdin = tokio::io::stdin();
        let mut reader = BufReader::new(stdin).lines();

        let (tx, mut rx) = mpsc::channel::<String>(64);
        let writer_task = tokio::spawn(async move {
            let mut writer = BufWriter::new(tokio::io::stdout());
            while let Some(line) = rx.recv().await {
                if writer.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if writer.write_all(b"\n").await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
        });

        let mut inflight = tokio::task::JoinSet::new();
        while let Some(line) = reader
            .next_line()
            .await
            .map_err(|err| ToolError::execution(format!("stdin read failed: {}", err)))?
        {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let request = match protocol::parse_request(trimmed) {
                Ok(request) => request,
                Err(err) => {
                    let payload = protocol::error_response(&Value::Null, &err).to_string();
                    let _ = tx.send(payload).await;
                    continue;
                }
            };

            let app = self.app.clone();
            let tx = tx.clone();
            inflight.spawn(async move {
                let response = match Self::dispatch(&app, &request.tool, &request.args).await {
                    Ok(result) => protocol::success_response(&request.id, result),
                    Err(err) => {
                        app.logger.warn(
                            "tool call failed",
                            Some(&serde_json::json!({
                                "tool": request.tool,
                                "kind": err.kind.as_str(),
                                "message": err.message,
                            })),
                        );
                        protocol::error_response(&request.id, &err)
                    }
                };
                let _ = tx.send(response.to_string()).await;
            });
            // keep the set from accumulating finished handles
            while inflight.try_join_next().is_some() {}
        }

        // stdin closed: drain in-flight calls, then shut the substrate down.
        while inflight.join_next().await.is_some() {}
        drop(tx);
        let _ = writer_task.await;
        self.app.shutdown().await;
        Ok(())
    }
}

pub async fn run_stdio() -> Result<(), ToolError> {
    let server = Server::new()?;
    server.run_stdio().await
}
