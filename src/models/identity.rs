use serde::Serialize;

/// 学生身份，由名单表中的一行生成
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Identity {
    /// 提交键（名单表中的 key 列）
    pub key: String,
    pub name: String,
    pub email: String,
}

impl Identity {
    pub fn new(key: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            email: email.into(),
        }
    }
}
