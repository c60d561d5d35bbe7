//! Echo 工具（测试与演示用）

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::Tool;

/// Echo 工具：回显文本；若 args 带 "set" 对象，则以 JSON 返回并要求写回这些变量
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back. Args: {\"text\": \"message\", \"set\": {\"var\": value}}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let text = args
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or("(empty)");
        match args.get("set") {
            Some(set @ Value::Object(_)) => {
                Ok(json!({ "echo": text, "variables": set }).to_string())
            }
            Some(_) => Err("\"set\" must be an object".to_string()),
            None => Ok(text.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_with_variables() {
        let out = EchoTool
            .execute(json!({"text": "hi", "set": {"answer": 42}}))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["variables"]["answer"], 42);
    }

    #[tokio::test]
    async fn test_echo_rejects_non_object_set() {
        assert!(EchoTool.execute(json!({"set": 1})).await.is_err());
    }
}
