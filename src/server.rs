//! MCP server implementation using rmcp.
//!
//! This is the consumer-facing surface: `tools/list` exposes the built-ins
//! followed by every provider tool under its namespaced name, and
//! `tools/call` delegates to the router. Tool failures never surface as
//! protocol errors; consumers always get a well-formed result with
//! `is_error` set.

use std::borrow::Cow;
use std::sync::Arc;

use anyhow::Result;
use rmcp::{
    ErrorData as McpError,
    handler::server::ServerHandler,
    model::*,
    service::{NotificationContext, RequestContext, RoleServer},
};
use rmcp::transport::streamable_http_server::{
    StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
};
use serde_json::Value;

use crate::api::AppState;
use crate::broker::Broker;
use crate::broker::router::ToolOutput;
use crate::tools::BuiltinTools;
use crate::types::namespaced_name;

const INSTRUCTIONS: &str = "Tool broker that bridges long-lived WebSocket tool providers into a \
     single MCP surface. Provider tools are namespaced as `<clientId>__<tool>`; built-in tools \
     cover client listing, notifications, speech, and AI queries.";

/// MCP server that handles protocol requests and delegates to the router.
#[derive(Clone)]
pub struct BrokerServer {
    state: AppState,
}

impl BrokerServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

/// Built-ins in declaration order, then provider tools in registration
/// order with namespaced names and `[<id>] `-prefixed descriptions.
pub fn consumer_tool_list(broker: &Broker, builtins: &BuiltinTools) -> Vec<Tool> {
    let mut tools: Vec<Tool> = builtins
        .handlers()
        .iter()
        .map(|handler| Tool {
            name: Cow::Owned(handler.name().to_string()),
            title: None,
            description: Some(Cow::Owned(handler.description().to_string())),
            input_schema: Arc::new(handler.input_schema()),
            output_schema: None,
            annotations: None,
            icons: None,
        })
        .collect();

    for (id, descriptor) in broker.provider_tools() {
        let schema = descriptor
            .input_schema
            .as_object()
            .cloned()
            .unwrap_or_default();
        tools.push(Tool {
            name: Cow::Owned(namespaced_name(&id, &descriptor.name)),
            title: None,
            description: Some(Cow::Owned(format!("[{id}] {}", descriptor.description))),
            input_schema: Arc::new(schema),
            output_schema: None,
            annotations: None,
            icons: None,
        });
    }

    tools
}

/// Convert router output into rmcp content items.
fn to_rmcp_content(items: &[Value]) -> Vec<Content> {
    items
        .iter()
        .map(|item| {
            match (
                item.get("type").and_then(Value::as_str),
                item.get("text").and_then(Value::as_str),
            ) {
                (Some("text"), Some(text)) => Content::text(text),
                _ => Content::text(item.to_string()),
            }
        })
        .collect()
}

fn to_call_result(output: ToolOutput) -> CallToolResult {
    CallToolResult {
        content: to_rmcp_content(&output.content),
        structured_content: None,
        is_error: Some(output.is_error),
        meta: None,
    }
}

impl ServerHandler for BrokerServer {
    fn ping(
        &self,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<(), McpError>> + Send + '_ {
        std::future::ready(Ok(()))
    }

    fn initialize(
        &self,
        _request: InitializeRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<InitializeResult, McpError>> + Send + '_ {
        std::future::ready(Ok(InitializeResult {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(INSTRUCTIONS.to_string()),
        }))
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools = consumer_tool_list(&self.state.broker, self.state.router.builtins());
        let mut result = ListToolsResult::default();
        result.tools = tools;
        std::future::ready(Ok(result))
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        let tool_name = request.name.to_string();
        let args = request.arguments.unwrap_or_default();
        let router = self.state.router.clone();

        async move {
            let output = router.route(&tool_name, args).await;
            Ok(to_call_result(output))
        }
    }

    // Default implementations for unsupported features

    fn complete(
        &self,
        _request: CompleteRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CompleteResult, McpError>> + Send + '_ {
        std::future::ready(Err(McpError::method_not_found::<CompleteRequestMethod>()))
    }

    fn set_level(
        &self,
        _request: SetLevelRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<(), McpError>> + Send + '_ {
        std::future::ready(Err(McpError::method_not_found::<SetLevelRequestMethod>()))
    }

    fn get_prompt(
        &self,
        _request: GetPromptRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<GetPromptResult, McpError>> + Send + '_ {
        std::future::ready(Err(McpError::method_not_found::<GetPromptRequestMethod>()))
    }

    fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListPromptsResult, McpError>> + Send + '_ {
        std::future::ready(Err(McpError::method_not_found::<ListPromptsRequestMethod>()))
    }

    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListResourcesResult, McpError>> + Send + '_ {
        std::future::ready(Err(McpError::method_not_found::<ListResourcesRequestMethod>()))
    }

    fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListResourceTemplatesResult, McpError>> + Send + '_ {
        std::future::ready(Err(
            McpError::method_not_found::<ListResourceTemplatesRequestMethod>(),
        ))
    }

    fn read_resource(
        &self,
        _request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ReadResourceResult, McpError>> + Send + '_ {
        std::future::ready(Err(McpError::method_not_found::<ReadResourceRequestMethod>()))
    }

    fn subscribe(
        &self,
        _request: SubscribeRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<(), McpError>> + Send + '_ {
        std::future::ready(Err(McpError::method_not_found::<SubscribeRequestMethod>()))
    }

    fn unsubscribe(
        &self,
        _request: UnsubscribeRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<(), McpError>> + Send + '_ {
        std::future::ready(Err(McpError::method_not_found::<UnsubscribeRequestMethod>()))
    }

    fn on_cancelled(
        &self,
        _notification: CancelledNotificationParam,
        _context: NotificationContext<RoleServer>,
    ) -> impl Future<Output = ()> + Send + '_ {
        std::future::ready(())
    }

    fn on_progress(
        &self,
        _notification: ProgressNotificationParam,
        _context: NotificationContext<RoleServer>,
    ) -> impl Future<Output = ()> + Send + '_ {
        std::future::ready(())
    }

    fn on_initialized(
        &self,
        _context: NotificationContext<RoleServer>,
    ) -> impl Future<Output = ()> + Send + '_ {
        std::future::ready(())
    }

    fn on_roots_list_changed(
        &self,
        _context: NotificationContext<RoleServer>,
    ) -> impl Future<Output = ()> + Send + '_ {
        std::future::ready(())
    }

    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(INSTRUCTIONS.to_string()),
        }
    }
}

/// Serve the dashboard router with the MCP endpoint nested at `/mcp`.
///
/// Stateless mode keeps each `POST /mcp` self-contained and answers `GET`
/// and `DELETE` with 405.
pub async fn serve_consumer_http(state: AppState, bind: &str) -> Result<()> {
    let service = StreamableHttpService::new(
        {
            let state = state.clone();
            move || Ok(BrokerServer::new(state.clone()))
        },
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig {
            stateful_mode: false,
            ..Default::default()
        },
    );

    let router = crate::api::router(state).nest_service("/mcp", service);
    let listener = tokio::net::TcpListener::bind(bind).await?;

    tracing::info!("consumer/dashboard HTTP server listening on http://{bind}");

    axum::serve(listener, router).await?;

    Ok(())
}
