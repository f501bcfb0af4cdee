//! Gateway HTTP server and the inbound relay processor.

use crate::audit::AuditLog;
use crate::channels::{InboundMessage, PlatformChannel, TelegramChannel};
use crate::config::{self, Config, ConfigStore};
use crate::exec::{CommandError, CommandPolicy};
use crate::gateway::error::ApiError;
use crate::interactions::{Interaction, InteractionStore, InteractionUpdate};
use crate::llm::{ChatMessage, GroqClient, LlmBackend};
use crate::mailbox::{Mailbox, RelayMessage, ASSISTANT_SENDER, WEB_CLIENT_SENDER};
use crate::tasks;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Inbound platform messages starting with this are commands, never auto-replied.
const COMMAND_PREFIX: char = '/';

/// Sent to the platform when the completion backend fails during an auto-reply.
const FALLBACK_REPLY: &str =
    "sorry, I could not come up with a reply. please try again later.";

/// Shared state for the gateway (config record, mailbox, stores, adapter, LLM).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<ConfigStore>,
    pub mailbox: Arc<Mailbox>,
    pub interactions: Arc<InteractionStore>,
    pub audit: Arc<AuditLog>,
    /// None when no bot token is configured; messaging endpoints answer 503.
    pub channel: Option<Arc<dyn PlatformChannel>>,
    pub llm: Arc<dyn LlmBackend>,
}

/// Default system message built from the configured persona.
fn persona_system_message(groq: &config::GroqConfig) -> String {
    format!("You are {}. Your role is to {}.", groq.role, groq.context)
}

/// First `max` characters with an ellipsis when shortened (for logs).
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max).collect::<String>())
    }
}

// --- Completion endpoint ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    prompt: Option<String>,
    #[serde(default)]
    history: Option<Vec<ChatMessage>>,
    system_message: Option<String>,
}

/// POST /generate — run the prompt (with optional history and custom system
/// message) through the completion backend and record the interaction.
async fn generate(
    State(state): State<GatewayState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let prompt = req
        .prompt
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let Some(prompt) = prompt else {
        state
            .audit
            .append("AI_INTERACTION", "FAILURE", json!({ "reason": "missing prompt" }))
            .await;
        return Err(ApiError::BadRequest(
            "the 'prompt' field is missing from the request body".to_string(),
        ));
    };

    log::info!("generation requested for prompt \"{}\"", truncate(&prompt, 50));
    state
        .audit
        .append(
            "AI_INTERACTION",
            "REQUESTED",
            json!({ "userPrompt": truncate(&prompt, 200) }),
        )
        .await;

    let snapshot = state.config.snapshot().await;
    let system = req
        .system_message
        .clone()
        .unwrap_or_else(|| persona_system_message(&snapshot.groq));
    let mut messages = vec![ChatMessage::system(system)];
    if let Some(ref history) = req.history {
        messages.extend(history.iter().cloned());
    }
    messages.push(ChatMessage::user(prompt.clone()));

    match state.llm.chat(messages).await {
        Ok(response) => {
            let interaction = state
                .interactions
                .add(prompt, &response, req.system_message, req.history)
                .await;
            state
                .audit
                .append(
                    "AI_INTERACTION",
                    "SUCCESS",
                    json!({
                        "interactionId": interaction.id,
                        "aiResponse": truncate(&response, 200),
                    }),
                )
                .await;
            Ok(Json(json!({
                "response": response,
                "interactionId": interaction.id,
            })))
        }
        Err(e) => {
            log::warn!("generation failed: {}", e);
            state
                .audit
                .append("AI_INTERACTION", "ERROR", json!({ "error": e.to_string() }))
                .await;
            Err(ApiError::Internal(e.to_string()))
        }
    }
}

// --- Interaction CRUD ---

async fn list_interactions(State(state): State<GatewayState>) -> Json<Vec<Interaction>> {
    let interactions = state.interactions.list().await;
    state
        .audit
        .append("CRUD_READ_ALL", "SUCCESS", json!({ "count": interactions.len() }))
        .await;
    Json(interactions)
}

async fn get_interaction(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<Interaction>, ApiError> {
    match state.interactions.get(&id).await {
        Some(interaction) => Ok(Json(interaction)),
        None => {
            state
                .audit
                .append("CRUD_READ_ONE", "NOT_FOUND", json!({ "interactionId": id }))
                .await;
            Err(ApiError::NotFound(format!("interaction {} not found", id)))
        }
    }
}

async fn update_interaction(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    Json(update): Json<InteractionUpdate>,
) -> Result<Json<Interaction>, ApiError> {
    match state.interactions.update(&id, update).await {
        Some(interaction) => {
            state
                .audit
                .append("CRUD_UPDATE", "SUCCESS", json!({ "interactionId": id }))
                .await;
            Ok(Json(interaction))
        }
        None => {
            state
                .audit
                .append("CRUD_UPDATE", "NOT_FOUND", json!({ "interactionId": id }))
                .await;
            Err(ApiError::NotFound(format!("interaction {} not found", id)))
        }
    }
}

async fn delete_interaction(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.interactions.remove(&id).await {
        state
            .audit
            .append("CRUD_DELETE", "SUCCESS", json!({ "interactionId": id }))
            .await;
        Ok(StatusCode::NO_CONTENT)
    } else {
        state
            .audit
            .append("CRUD_DELETE", "NOT_FOUND", json!({ "interactionId": id }))
            .await;
        Err(ApiError::NotFound(format!("interaction {} not found", id)))
    }
}

// --- Command execution ---

#[derive(Debug, Deserialize)]
struct CommandRequest {
    command: Option<String>,
}

/// POST /command — run an allowlisted command line. Success carries stdout
/// (and stderr when the command produced any despite exiting cleanly).
async fn run_command(
    State(state): State<GatewayState>,
    Json(req): Json<CommandRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let command = req
        .command
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let Some(command) = command else {
        state
            .audit
            .append("COMMAND_EXECUTION", "FAILURE", json!({ "reason": "missing command" }))
            .await;
        return Err(ApiError::BadRequest(
            "the 'command' field is missing from the request body".to_string(),
        ));
    };

    log::info!("command requested: \"{}\"", command);
    state
        .audit
        .append("COMMAND_EXECUTION", "REQUESTED", json!({ "requestedCommand": command }))
        .await;

    let snapshot = state.config.snapshot().await;
    let policy = CommandPolicy::new(snapshot.commands.authorized);
    match policy.run(&command).await {
        Ok(out) => {
            let status = if out.stderr.is_empty() {
                "SUCCESS"
            } else {
                "SUCCESS_WITH_STDERR"
            };
            state
                .audit
                .append("COMMAND_EXECUTION", status, json!({ "requestedCommand": command }))
                .await;
            let mut body = json!({ "success": true, "stdout": out.stdout });
            if !out.stderr.is_empty() {
                body["stderr"] = json!(out.stderr);
            }
            Ok(Json(body))
        }
        Err(CommandError::NotAuthorized(cmd)) => {
            log::warn!("unauthorized command attempted: \"{}\"", cmd);
            state
                .audit
                .append(
                    "COMMAND_EXECUTION",
                    "FAILURE",
                    json!({ "reason": "unauthorized command", "requestedCommand": cmd }),
                )
                .await;
            Err(ApiError::Forbidden("command not authorized".to_string()))
        }
        Err(e) => {
            state
                .audit
                .append(
                    "COMMAND_EXECUTION",
                    "ERROR",
                    json!({ "requestedCommand": command, "error": e.to_string() }),
                )
                .await;
            Err(ApiError::Internal(format!("command execution failed: {}", e)))
        }
    }
}

// --- Heavy task ---

/// GET /api/heavy-task — run the synthetic CPU-bound task off the event loop.
async fn heavy_task(State(state): State<GatewayState>) -> Result<String, ApiError> {
    log::info!("heavy task requested");
    let total = tasks::run_heavy_task(tasks::DEFAULT_ITERATIONS)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    state
        .audit
        .append("HEAVY_TASK", "SUCCESS", json!({ "total": total }))
        .await;
    Ok(format!("The result of the CPU intensive task is {}\n", total))
}

// --- Telegram relay endpoints ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TelegramSendRequest {
    chat_id: Option<String>,
    topic_id: Option<String>,
    message: Option<String>,
}

/// POST /api/telegram/send — deliver a web-composed message to the platform
/// and echo it into the mailbox.
async fn telegram_send(
    State(state): State<GatewayState>,
    Json(req): Json<TelegramSendRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let chat_id = req
        .chat_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let Some(chat_id) = chat_id else {
        return Err(ApiError::BadRequest(
            "the 'chatId' field is missing or empty".to_string(),
        ));
    };
    let message = req
        .message
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let Some(message) = message else {
        return Err(ApiError::BadRequest(
            "the 'message' field is missing or empty".to_string(),
        ));
    };
    let topic_id = req
        .topic_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let Some(channel) = state.channel.clone() else {
        return Err(ApiError::ServiceUnavailable(
            "telegram messaging is not configured".to_string(),
        ));
    };

    match channel
        .send_message(&chat_id, topic_id.as_deref(), &message)
        .await
    {
        Ok(message_id) => {
            let echo = RelayMessage::outbound_echo(
                chat_id.clone(),
                topic_id,
                WEB_CLIENT_SENDER,
                message,
                Some(message_id),
            );
            state.mailbox.enqueue(echo.clone()).await;
            state
                .audit
                .append(
                    "TELEGRAM_SEND",
                    "SUCCESS",
                    json!({ "chatId": chat_id, "messageId": message_id }),
                )
                .await;
            Ok(Json(json!({ "success": true, "sentMessage": echo })))
        }
        Err(e) => {
            log::warn!("telegram send failed: {}", e);
            state
                .audit
                .append(
                    "TELEGRAM_SEND",
                    "ERROR",
                    json!({ "chatId": chat_id, "error": e.to_string() }),
                )
                .await;
            Err(ApiError::Delivery(e.to_string()))
        }
    }
}

/// GET /api/telegram/messages — drain the mailbox. The batch goes to whichever
/// caller drains first; afterwards the mailbox is empty for everyone.
async fn telegram_messages(
    State(state): State<GatewayState>,
) -> Json<serde_json::Value> {
    let messages = state.mailbox.drain_all().await;
    Json(json!({ "messages": messages }))
}

// --- Config record ---

async fn get_config(State(state): State<GatewayState>) -> Json<Config> {
    Json(state.config.snapshot().await.redacted())
}

async fn update_config(
    State(state): State<GatewayState>,
    Json(patch): Json<serde_json::Value>,
) -> Result<Json<Config>, ApiError> {
    match state.config.update(patch).await {
        Ok(merged) => {
            state.audit.append("CONFIG_UPDATE", "SUCCESS", json!({})).await;
            Ok(Json(merged.redacted()))
        }
        Err(e) => Err(ApiError::BadRequest(e.to_string())),
    }
}

// --- Health ---

async fn health(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let snapshot = state.config.snapshot().await;
    Json(json!({
        "status": "running",
        "port": snapshot.gateway.port,
        "messaging": state.channel.is_some(),
    }))
}

/// Assemble the router over the shared state.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/generate", post(generate))
        .route("/api/interactions", get(list_interactions))
        .route(
            "/api/interactions/:id",
            get(get_interaction)
                .put(update_interaction)
                .delete(delete_interaction),
        )
        .route("/command", post(run_command))
        .route("/api/heavy-task", get(heavy_task))
        .route("/api/telegram/send", post(telegram_send))
        .route("/api/telegram/messages", get(telegram_messages))
        .route("/api/config", get(get_config).post(update_config))
        .with_state(state)
}

// --- Inbound relay processing ---

async fn deliver(channel: &dyn PlatformChannel, msg: &InboundMessage, text: &str) {
    if let Err(e) = channel
        .send_message(&msg.chat_id, msg.topic_id.as_deref(), text)
        .await
    {
        log::warn!("platform reply delivery failed: {}", e);
    }
}

/// Dispatch an inbound platform command (`command_line` has the prefix already
/// stripped). Replies go to the platform only; they are not echoed into the
/// mailbox.
async fn handle_platform_command(
    state: &GatewayState,
    channel: &dyn PlatformChannel,
    msg: &InboundMessage,
    command_line: &str,
) {
    let mut parts = command_line.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or("");
    let args = parts.next().map(str::trim).unwrap_or("");
    log::info!("platform command /{} from {}", command, msg.sender);
    state
        .audit
        .append(
            "TELEGRAM_COMMAND",
            "RECEIVED",
            json!({ "command": command, "from": msg.sender }),
        )
        .await;

    match command {
        "start" => {
            let text = format!(
                "hello {}! I am the worker bot, here to run tasks for you.",
                msg.sender
            );
            deliver(channel, msg, &text).await;
        }
        "status" => {
            deliver(channel, msg, "I am active and ready to work!").await;
        }
        "process_task" => {
            if args.is_empty() {
                deliver(
                    channel,
                    msg,
                    "please provide a task description. example: /process_task analyze the logs",
                )
                .await;
                return;
            }
            deliver(
                channel,
                msg,
                &format!("ok, processing task: \"{}\". this may take a moment...", args),
            )
            .await;
            let messages = vec![
                ChatMessage::system(
                    "You are an assistant that processes tasks and produces concise reports. Answer as if you just completed the task.",
                ),
                ChatMessage::user(format!(
                    "Process the following task and give a brief report: \"{}\"",
                    args
                )),
            ];
            match state.llm.chat(messages).await {
                Ok(report) => {
                    deliver(
                        channel,
                        msg,
                        &format!("task \"{}\" complete.\n\n{}", args, report),
                    )
                    .await;
                }
                Err(e) => {
                    log::warn!("task processing failed: {}", e);
                    deliver(
                        channel,
                        msg,
                        "sorry, an error occurred while processing the task.",
                    )
                    .await;
                }
            }
        }
        "heavy_process" => {
            deliver(channel, msg, "starting a heavy computation. this may take a while...")
                .await;
            match tasks::run_heavy_task(tasks::DEFAULT_ITERATIONS).await {
                Ok(total) => {
                    deliver(
                        channel,
                        msg,
                        &format!("heavy computation finished: the result is {}", total),
                    )
                    .await;
                }
                Err(e) => {
                    log::warn!("heavy task failed: {}", e);
                    deliver(channel, msg, "sorry, the heavy computation failed.").await;
                }
            }
        }
        _ => {
            deliver(
                channel,
                msg,
                "unknown command. available: /start, /status, /process_task <description>, /heavy_process",
            )
            .await;
        }
    }
}

/// Process one inbound platform message: capture it in the mailbox, then
/// either dispatch the command or auto-reply through the completion backend.
async fn process_inbound_message(state: GatewayState, msg: InboundMessage) {
    state
        .mailbox
        .enqueue(RelayMessage::inbound(
            msg.chat_id.clone(),
            msg.topic_id.clone(),
            msg.sender.clone(),
            msg.text.clone(),
            Some(msg.message_id),
        ))
        .await;
    state
        .audit
        .append(
            "TELEGRAM_INBOUND",
            "CAPTURED",
            json!({ "chatId": msg.chat_id, "topicId": msg.topic_id, "from": msg.sender }),
        )
        .await;

    let Some(channel) = state.channel.clone() else {
        return;
    };

    let trimmed = msg.text.trim();
    if let Some(command_line) = trimmed.strip_prefix(COMMAND_PREFIX) {
        handle_platform_command(&state, channel.as_ref(), &msg, command_line).await;
        return;
    }

    let snapshot = state.config.snapshot().await;
    let messages = vec![
        ChatMessage::system(persona_system_message(&snapshot.groq)),
        ChatMessage::user(trimmed),
    ];
    let reply = match state.llm.chat(messages).await {
        Ok(text) => text,
        Err(e) => {
            log::warn!("auto-reply generation failed: {}", e);
            state
                .audit
                .append("TELEGRAM_AUTO_REPLY", "ERROR", json!({ "error": e.to_string() }))
                .await;
            FALLBACK_REPLY.to_string()
        }
    };

    match channel
        .send_message(&msg.chat_id, msg.topic_id.as_deref(), &reply)
        .await
    {
        Ok(message_id) => {
            state
                .mailbox
                .enqueue(RelayMessage::outbound_echo(
                    msg.chat_id.clone(),
                    msg.topic_id.clone(),
                    ASSISTANT_SENDER,
                    reply,
                    Some(message_id),
                ))
                .await;
        }
        Err(e) => {
            // no echo: the conversation never saw this reply
            log::warn!("auto-reply delivery failed: {}", e);
            state
                .audit
                .append(
                    "TELEGRAM_AUTO_REPLY",
                    "DELIVERY_FAILED",
                    json!({ "error": e.to_string() }),
                )
                .await;
        }
    }
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// Blocks until shutdown (Ctrl+C or SIGTERM). A missing Groq API key is a
/// startup error; a missing Telegram token only disables the messaging
/// feature (send answers 503, the rest keeps working).
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    let api_key = config::resolve_groq_api_key(&config).context(
        "groq api key is not configured; set GROQ_API_KEY or groq.apiKey in the config file",
    )?;
    let llm: Arc<dyn LlmBackend> = Arc::new(GroqClient::new(api_key, &config.groq));

    let log_file = config::resolve_log_file(&config, &config_path);
    let audit = Arc::new(
        AuditLog::open(&log_file)
            .await
            .with_context(|| format!("opening audit log at {}", log_file.display()))?,
    );
    log::info!("interactions will be logged to {}", log_file.display());

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(64);
    let telegram_token = config::resolve_telegram_token(&config);
    let (channel, channel_task): (Option<Arc<TelegramChannel>>, Option<JoinHandle<()>>) =
        match telegram_token {
            Some(token) => {
                let telegram = Arc::new(TelegramChannel::new(token));
                let task = telegram.clone().start_inbound(inbound_tx);
                log::info!("telegram channel started (getUpdates long-poll)");
                (Some(telegram), Some(task))
            }
            None => {
                log::warn!(
                    "telegram bot token not configured; messaging endpoints will answer 503"
                );
                drop(inbound_tx);
                (None, None)
            }
        };

    let state = GatewayState {
        config: Arc::new(ConfigStore::new(config.clone(), config_path)),
        mailbox: Arc::new(Mailbox::new()),
        interactions: Arc::new(InteractionStore::new()),
        audit,
        channel: channel
            .clone()
            .map(|c| c as Arc<dyn PlatformChannel>),
        llm,
    };

    {
        let state_inbound = state.clone();
        tokio::spawn(async move {
            while let Some(msg) = inbound_rx.recv().await {
                process_inbound_message(state_inbound.clone(), msg).await;
            }
        });
    }

    let app = build_router(state);
    let bind_addr = format!("{}:{}", config.gateway.bind, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(channel, channel_task))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or
/// SIGTERM). Stops the channel loop, then awaits it.
async fn shutdown_signal(
    channel: Option<Arc<TelegramChannel>>,
    channel_task: Option<JoinHandle<()>>,
) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received");

    if let Some(channel) = channel {
        channel.stop();
    }
    if let Some(task) = channel_task {
        let _ = task.await;
    }
    log::info!("channel task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::DeliveryError;
    use crate::client::{is_displayable, ConversationAddress};
    use crate::llm::LlmError;
    use crate::mailbox::Direction;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct MockChannel {
        fail: bool,
        sent: Mutex<Vec<(String, Option<String>, String)>>,
        next_id: AtomicI64,
    }

    impl MockChannel {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                sent: Mutex::new(Vec::new()),
                next_id: AtomicI64::new(1000),
            }
        }
    }

    #[async_trait]
    impl PlatformChannel for MockChannel {
        fn id(&self) -> &str {
            "mock"
        }

        fn stop(&self) {}

        async fn send_message(
            &self,
            chat_id: &str,
            topic_id: Option<&str>,
            text: &str,
        ) -> Result<i64, DeliveryError> {
            if self.fail {
                return Err(DeliveryError::Rejected("400 chat not found".to_string()));
            }
            self.sent
                .lock()
                .await
                .push((chat_id.to_string(), topic_id.map(String::from), text.to_string()));
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
        }
    }

    struct MockLlm {
        reply: Option<String>,
        calls: AtomicUsize,
    }

    impl MockLlm {
        fn replying(text: &str) -> Self {
            Self {
                reply: Some(text.to_string()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmBackend for MockLlm {
        async fn chat(&self, _messages: Vec<ChatMessage>) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Some(text) => Ok(text.clone()),
                None => Err(LlmError::NoContent),
            }
        }
    }

    async fn test_state(
        channel: Option<Arc<MockChannel>>,
        llm: Arc<MockLlm>,
    ) -> GatewayState {
        let dir =
            std::env::temp_dir().join(format!("pibot-gateway-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let audit = AuditLog::open(dir.join("logs.json")).await.expect("audit log");
        GatewayState {
            config: Arc::new(ConfigStore::new(Config::default(), dir.join("config.json"))),
            mailbox: Arc::new(Mailbox::new()),
            interactions: Arc::new(InteractionStore::new()),
            audit: Arc::new(audit),
            channel: channel.map(|c| c as Arc<dyn PlatformChannel>),
            llm,
        }
    }

    fn inbound(text: &str) -> InboundMessage {
        InboundMessage {
            chat_id: "42".to_string(),
            topic_id: None,
            sender: "alice".to_string(),
            text: text.to_string(),
            message_id: 7,
        }
    }

    #[tokio::test]
    async fn inbound_text_is_captured_and_auto_replied() {
        let channel = Arc::new(MockChannel::new(false));
        let llm = Arc::new(MockLlm::replying("hi alice"));
        let state = test_state(Some(channel.clone()), llm.clone()).await;

        process_inbound_message(state.clone(), inbound("hello")).await;

        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        assert_eq!(channel.sent.lock().await.len(), 1);

        let batch = state.mailbox.drain_all().await;
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].direction, Direction::Inbound);
        assert_eq!(batch[0].content, "hello");
        assert_eq!(batch[1].direction, Direction::OutboundEcho);
        assert_eq!(batch[1].sender, ASSISTANT_SENDER);
        assert_eq!(batch[1].content, "hi alice");
        assert_eq!(batch[1].chat_id, "42");

        // the echo is what a client holding (42, None) displays; a second
        // immediate drain sees nothing
        let address = ConversationAddress {
            chat_id: "42".to_string(),
            topic_id: None,
        };
        let displayed: Vec<_> = batch
            .iter()
            .filter(|m| is_displayable(&address, m))
            .collect();
        assert_eq!(displayed.len(), 1);
        assert!(state.mailbox.drain_all().await.is_empty());
    }

    #[tokio::test]
    async fn command_prefixed_text_skips_the_auto_reply() {
        let channel = Arc::new(MockChannel::new(false));
        let llm = Arc::new(MockLlm::replying("must not be used"));
        let state = test_state(Some(channel.clone()), llm.clone()).await;

        process_inbound_message(state.clone(), inbound("/help")).await;

        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
        let batch = state.mailbox.drain_all().await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].direction, Direction::Inbound);
        // the unknown-command reply went to the platform but was not echoed
        assert_eq!(channel.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn platform_commands_are_dispatched() {
        let channel = Arc::new(MockChannel::new(false));
        let llm = Arc::new(MockLlm::replying("report body"));
        let state = test_state(Some(channel.clone()), llm.clone()).await;

        process_inbound_message(state.clone(), inbound("/start")).await;
        process_inbound_message(state.clone(), inbound("/status")).await;
        process_inbound_message(state.clone(), inbound("/process_task sort the backlog")).await;
        process_inbound_message(state.clone(), inbound("/process_task")).await;

        let sent = channel.sent.lock().await;
        assert!(sent[0].2.contains("hello alice"));
        assert!(sent[1].2.contains("active"));
        // ack + report for the task
        assert!(sent[2].2.contains("sort the backlog"));
        assert!(sent[3].2.contains("report body"));
        // missing description gets the usage hint
        assert!(sent[4].2.contains("provide a task description"));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delivery_failure_enqueues_no_echo() {
        let channel = Arc::new(MockChannel::new(true));
        let llm = Arc::new(MockLlm::replying("hi"));
        let state = test_state(Some(channel.clone()), llm.clone()).await;

        process_inbound_message(state.clone(), inbound("hello")).await;

        let batch = state.mailbox.drain_all().await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].direction, Direction::Inbound);
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_the_generic_reply() {
        let channel = Arc::new(MockChannel::new(false));
        let llm = Arc::new(MockLlm {
            reply: None,
            calls: AtomicUsize::new(0),
        });
        let state = test_state(Some(channel.clone()), llm.clone()).await;

        process_inbound_message(state.clone(), inbound("hello")).await;

        let sent = channel.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].2, FALLBACK_REPLY);
        let batch = state.mailbox.drain_all().await;
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1].content, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn send_validates_chat_and_message() {
        let channel = Arc::new(MockChannel::new(false));
        let llm = Arc::new(MockLlm::replying("unused"));
        let state = test_state(Some(channel.clone()), llm).await;

        let missing_chat = telegram_send(
            State(state.clone()),
            Json(TelegramSendRequest {
                chat_id: Some("".to_string()),
                topic_id: None,
                message: Some("hi".to_string()),
            }),
        )
        .await;
        assert!(matches!(missing_chat, Err(ApiError::BadRequest(_))));

        let missing_message = telegram_send(
            State(state.clone()),
            Json(TelegramSendRequest {
                chat_id: Some("123".to_string()),
                topic_id: None,
                message: Some("".to_string()),
            }),
        )
        .await;
        assert!(matches!(missing_message, Err(ApiError::BadRequest(_))));

        let ok = telegram_send(
            State(state.clone()),
            Json(TelegramSendRequest {
                chat_id: Some("123".to_string()),
                topic_id: None,
                message: Some("hi".to_string()),
            }),
        )
        .await;
        assert!(ok.is_ok());
        let batch = state.mailbox.drain_all().await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].direction, Direction::OutboundEcho);
        assert_eq!(batch[0].chat_id, "123");
        assert_eq!(batch[0].sender, WEB_CLIENT_SENDER);
    }

    #[tokio::test]
    async fn send_without_adapter_is_service_unavailable() {
        let llm = Arc::new(MockLlm::replying("unused"));
        let state = test_state(None, llm).await;

        let res = telegram_send(
            State(state),
            Json(TelegramSendRequest {
                chat_id: Some("123".to_string()),
                topic_id: None,
                message: Some("hi".to_string()),
            }),
        )
        .await;
        assert!(matches!(res, Err(ApiError::ServiceUnavailable(_))));
    }

    #[tokio::test]
    async fn send_delivery_failure_surfaces_the_platform_detail() {
        let channel = Arc::new(MockChannel::new(true));
        let llm = Arc::new(MockLlm::replying("unused"));
        let state = test_state(Some(channel), llm).await;

        let res = telegram_send(
            State(state.clone()),
            Json(TelegramSendRequest {
                chat_id: Some("123".to_string()),
                topic_id: None,
                message: Some("hi".to_string()),
            }),
        )
        .await;
        match res {
            Err(ApiError::Delivery(detail)) => assert!(detail.contains("chat not found")),
            other => panic!("expected delivery error, got {:?}", other.map(|_| ())),
        }
        assert!(state.mailbox.drain_all().await.is_empty());
    }
}
