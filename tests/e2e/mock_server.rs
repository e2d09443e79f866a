//! A scripted MCP server speaking newline-delimited JSON-RPC over stdio.
//!
//! Tools:
//! - `find`   answers with a text block
//! - `fail`   answers with a JSON-RPC error
//! - `slow`   never answers
//! - `notify` sends a log notification, then answers in two writes
//! - `crash`  exits with status 1 without answering

use finchat::config::McpConfig;
use std::path::PathBuf;
use tempfile::TempDir;

const SCRIPT: &str = r#"
echo "mock MCP server starting" >&2
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9]*\),.*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","serverInfo":{"name":"mock-mongodb","version":"0.0.1"},"capabilities":{"tools":{}}}}\n' "$id"
      ;;
    *'"method":"notifications/initialized"'*)
      ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"find","description":"Run a find query","inputSchema":{"type":"object"}},{"name":"fail","inputSchema":{"type":"object"}},{"name":"slow","inputSchema":{"type":"object"}},{"name":"notify","inputSchema":{"type":"object"}},{"name":"crash","inputSchema":{"type":"object"}}]}}\n' "$id"
      ;;
    *'"name":"find"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"BTC 64000"}]}}\n' "$id"
      ;;
    *'"name":"fail"'*)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32000,"message":"collection not found"}}\n' "$id"
      ;;
    *'"name":"slow"'*)
      ;;
    *'"name":"notify"'*)
      printf '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info","data":"querying prices"}}\n'
      printf '{"jsonrpc":"2.0","id":%s,' "$id"
      sleep 0.1
      printf '"result":{"content":[{"type":"text","text":"done"}]}}\n'
      ;;
    *'"name":"crash"'*)
      echo "mock MCP server crashing" >&2
      exit 1
      ;;
  esac
done
"#;

pub struct MockServer {
    _dir: TempDir,
    script: PathBuf,
}

impl MockServer {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("mock-mcp-server.sh");
        std::fs::write(&script, SCRIPT).expect("write script");
        Self { _dir: dir, script }
    }

    /// Config launching the script through `sh`, with dummy credentials
    pub fn config(&self) -> McpConfig {
        McpConfig {
            command: "sh".to_string(),
            args: vec![self.script.display().to_string()],
            connection_string: Some("mongodb://localhost/finance".to_string()),
            api_client_id: Some("test-client".to_string()),
            api_client_secret: Some("test-secret".to_string()),
            tool_timeout_secs: 1,
            list_timeout_secs: 5,
            ..Default::default()
        }
    }
}
