// MCP (Model Context Protocol) pipe transport
// Line-delimited JSON-RPC over stdio, backed by the shared dispatcher

pub mod protocol;
pub mod server;

pub use server::McpServer;
