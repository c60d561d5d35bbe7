//! 工具权限：允许列表或通配符
//!
//! JSON 形式始终是字符串列表；列表中出现 "*" 即视为允许全部工具，跳过逐个检查。

use serde::{Deserialize, Serialize};

/// 通配符：允许全部工具
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub enum ToolPermissions {
    All,
    /// 有序、去重的工具名列表
    Allowed(Vec<String>),
}

impl ToolPermissions {
    pub fn allowed<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        Self::from(names)
    }

    pub fn allows(&self, tool: &str) -> bool {
        match self {
            ToolPermissions::All => true,
            ToolPermissions::Allowed(names) => names.iter().any(|n| n == tool),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, ToolPermissions::All)
    }

    /// 列表形式（通配符表示为 ["*"]）
    pub fn entries(&self) -> Vec<String> {
        self.clone().into()
    }
}

impl From<Vec<String>> for ToolPermissions {
    fn from(names: Vec<String>) -> Self {
        if names.iter().any(|n| n == WILDCARD) {
            return ToolPermissions::All;
        }
        let mut ordered: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            if !ordered.contains(&name) {
                ordered.push(name);
            }
        }
        ToolPermissions::Allowed(ordered)
    }
}

impl From<ToolPermissions> for Vec<String> {
    fn from(p: ToolPermissions) -> Self {
        match p {
            ToolPermissions::All => vec![WILDCARD.to_string()],
            ToolPermissions::Allowed(names) => names,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_allows_everything() {
        let p = ToolPermissions::allowed(["read_file", "*"]);
        assert!(p.is_wildcard());
        assert!(p.allows("anything"));
        assert_eq!(p.entries(), vec!["*".to_string()]);
    }

    #[test]
    fn test_allow_list_dedups_in_order() {
        let p = ToolPermissions::allowed(["b", "a", "b"]);
        assert_eq!(p, ToolPermissions::Allowed(vec!["b".into(), "a".into()]));
        assert!(p.allows("a"));
        assert!(!p.allows("c"));
    }

    #[test]
    fn test_deserialize_requires_list() {
        let ok: ToolPermissions = serde_json::from_str(r#"["echo"]"#).unwrap();
        assert!(ok.allows("echo"));
        assert!(serde_json::from_str::<ToolPermissions>(r#""not-a-list""#).is_err());
    }
}
