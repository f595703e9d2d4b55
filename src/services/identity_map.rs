//! 名单表：提交键 → 学生身份
//!
//! 名单必须有表头行。键重复直接报错，不做静默覆盖；键为空的行跳过。

use crate::error::MappingError;
use crate::models::Identity;
use indexmap::IndexMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// 名单映射（按表中顺序）
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    identities: IndexMap<String, Identity>,
}

impl IdentityMap {
    /// 从 CSV 文件加载
    ///
    /// # 参数
    /// - `path`: 名单 CSV 路径
    /// - `key_column` / `name_column` / `email_column`: 列名
    pub fn load(
        path: &Path,
        key_column: &str,
        name_column: &str,
        email_column: &str,
    ) -> Result<Self, MappingError> {
        if !path.is_file() {
            return Err(MappingError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let file = std::fs::File::open(path).map_err(|e| MappingError::Csv(e.into()))?;
        let map = Self::from_reader(file, key_column, name_column, email_column)?;
        info!("✓ 已加载名单 {} ({} 名学生)", path.display(), map.len());
        Ok(map)
    }

    /// 从任意 CSV 数据源加载
    pub fn from_reader<R: Read>(
        reader: R,
        key_column: &str,
        name_column: &str,
        email_column: &str,
    ) -> Result<Self, MappingError> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| MappingError::MissingColumn {
                    column: name.to_string(),
                    headers: headers.clone(),
                })
        };
        let key_idx = column(key_column)?;
        let name_idx = column(name_column)?;
        let email_idx = column(email_column)?;

        let mut identities: IndexMap<String, Identity> = IndexMap::new();
        let mut lines: IndexMap<String, u64> = IndexMap::new();

        for record in rdr.records() {
            let record = record?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            let cell = |idx: usize| record.get(idx).unwrap_or("").to_string();

            let key = cell(key_idx);
            if key.is_empty() {
                debug!("名单第 {} 行键为空，已跳过", line);
                continue;
            }
            if let Some(first_line) = lines.get(&key) {
                return Err(MappingError::DuplicateKey {
                    key,
                    first_line: *first_line,
                    second_line: line,
                });
            }

            lines.insert(key.clone(), line);
            identities.insert(
                key.clone(),
                Identity::new(key, cell(name_idx), cell(email_idx)),
            );
        }

        Ok(Self { identities })
    }

    /// 精确（区分大小写）查找
    pub fn get(&self, key: &str) -> Option<&Identity> {
        self.identities.get(key)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.identities.values()
    }
}

impl FromIterator<Identity> for IdentityMap {
    fn from_iter<I: IntoIterator<Item = Identity>>(iter: I) -> Self {
        Self {
            identities: iter
                .into_iter()
                .map(|identity| (identity.key.clone(), identity))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROSTER: &str = "username,name,email\n\
        plab1001, John Doe ,john@example.com\n\
        plab1002,Jane Roe,jane@example.com\n\
        ,Nobody,nobody@example.com\n";

    #[test]
    fn test_lookup_returns_row() {
        let map = IdentityMap::from_reader(ROSTER.as_bytes(), "username", "name", "email").unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(
            map.get("plab1001"),
            Some(&Identity::new("plab1001", "John Doe", "john@example.com"))
        );
        assert!(map.get("PLAB1001").is_none());
    }

    #[test]
    fn test_duplicate_key_fails_loudly() {
        let text = "username,name,email\nplab1001,A,a@x\nplab1002,B,b@x\nplab1001,C,c@x\n";
        let err = IdentityMap::from_reader(text.as_bytes(), "username", "name", "email").unwrap_err();
        match err {
            MappingError::DuplicateKey {
                key,
                first_line,
                second_line,
            } => {
                assert_eq!(key, "plab1001");
                assert_eq!(first_line, 2);
                assert_eq!(second_line, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_column_is_reported() {
        let err = IdentityMap::from_reader(ROSTER.as_bytes(), "username", "full_name", "email")
            .unwrap_err();
        assert!(matches!(err, MappingError::MissingColumn { ref column, .. } if column == "full_name"));
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = IdentityMap::load(Path::new("/no/such/roster.csv"), "k", "n", "e").unwrap_err();
        assert!(matches!(err, MappingError::NotFound { .. }));
    }
}
