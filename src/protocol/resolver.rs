//! 短 ID 解析
//!
//! 窗口完整 ID 较长，交互输入时使用末尾 `key_len` 个字符作为短 ID。
//! 映射表在每次窗口类命令分发前整体重建（构建新表后原子替换），
//! 读者要么看到旧表、要么看到新表，不会看到半成品。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::protocol::handlers::{HandlerError, ResourceEnumerator};

pub const DEFAULT_SHORT_ID_LEN: usize = 8;

/// 解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// 输入本身就是已知完整 ID
    Full(String),
    /// 短 ID 唯一对应一个完整 ID
    Expanded { short: String, full: String },
    /// 短 ID 对应多个完整 ID，拒绝猜测
    Ambiguous { short: String, candidates: Vec<String> },
    NotFound(String),
}

impl Resolution {
    pub fn resolved(&self) -> Option<&str> {
        match self {
            Resolution::Full(id) => Some(id),
            Resolution::Expanded { full, .. } => Some(full),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct ShortIdTable {
    full_ids: HashSet<String>,
    by_short: HashMap<String, Vec<String>>,
}

impl ShortIdTable {
    fn build(ids: impl IntoIterator<Item = String>, key_len: usize) -> Self {
        let mut table = Self::default();
        for id in ids {
            let short = short_key(&id, key_len).to_string();
            let bucket = table.by_short.entry(short).or_default();
            if !bucket.contains(&id) {
                bucket.push(id.clone());
            }
            table.full_ids.insert(id);
        }
        table
    }

    fn resolve(&self, candidate: &str) -> Resolution {
        if self.full_ids.contains(candidate) {
            return Resolution::Full(candidate.to_string());
        }
        match self.by_short.get(candidate).map(Vec::as_slice) {
            Some([only]) => Resolution::Expanded {
                short: candidate.to_string(),
                full: only.clone(),
            },
            Some(many) if many.len() > 1 => Resolution::Ambiguous {
                short: candidate.to_string(),
                candidates: many.to_vec(),
            },
            _ => Resolution::NotFound(candidate.to_string()),
        }
    }
}

/// 取末尾 `key_len` 个字符（按 char 边界）
pub fn short_key(id: &str, key_len: usize) -> &str {
    let count = id.chars().count();
    if count <= key_len {
        return id;
    }
    match id.char_indices().nth(count - key_len) {
        Some((idx, _)) => &id[idx..],
        None => id,
    }
}

pub struct ShortIdResolver {
    key_len: usize,
    table: RwLock<Option<Arc<ShortIdTable>>>,
}

impl ShortIdResolver {
    pub fn new(key_len: usize) -> Self {
        Self {
            key_len: key_len.max(1),
            table: RwLock::new(None),
        }
    }

    pub fn key_len(&self) -> usize {
        self.key_len
    }

    /// 用当前资源清单重建映射表，返回完整 ID 数量
    pub async fn refresh(&self, enumerator: &dyn ResourceEnumerator) -> Result<usize, HandlerError> {
        let table = self.rebuild(enumerator).await?;
        Ok(table.full_ids.len())
    }

    /// 刷新后立即在新表上解析，避免与并发刷新交错
    pub async fn refresh_and_resolve(
        &self,
        enumerator: &dyn ResourceEnumerator,
        candidate: &str,
    ) -> Result<Resolution, HandlerError> {
        let table = self.rebuild(enumerator).await?;
        Ok(table.resolve(candidate))
    }

    /// 在最近一次刷新的表上解析；从未刷新时没有任何已知 ID，一律 NotFound
    pub async fn resolve(&self, candidate: &str) -> Resolution {
        match self.table.read().await.as_ref() {
            Some(table) => table.resolve(candidate),
            None => Resolution::NotFound(candidate.to_string()),
        }
    }

    /// 当前已知的 (短 ID, 完整 ID) 列表，只包含无歧义的条目
    pub async fn known(&self) -> Vec<(String, String)> {
        let guard = self.table.read().await;
        let Some(table) = guard.as_ref() else {
            return Vec::new();
        };
        let mut out: Vec<(String, String)> = table
            .by_short
            .iter()
            .filter_map(|(short, fulls)| match fulls.as_slice() {
                [only] => Some((short.clone(), only.clone())),
                _ => None,
            })
            .collect();
        out.sort();
        out
    }

    async fn rebuild(&self, enumerator: &dyn ResourceEnumerator) -> Result<Arc<ShortIdTable>, HandlerError> {
        let inventory = enumerator.enumerate().await?;
        let table = Arc::new(ShortIdTable::build(inventory.window_ids(), self.key_len));
        *self.table.write().await = Some(Arc::clone(&table));
        tracing::debug!(windows = table.full_ids.len(), "short id table refreshed");
        Ok(table)
    }
}

impl Default for ShortIdResolver {
    fn default() -> Self {
        Self::new(DEFAULT_SHORT_ID_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::handlers::{AppWindows, MonitorInfo, WindowInfo, WindowInventory};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedInventory(Mutex<Vec<String>>);

    impl FixedInventory {
        fn new(ids: &[&str]) -> Self {
            Self(Mutex::new(ids.iter().map(|s| s.to_string()).collect()))
        }

        fn set(&self, ids: &[&str]) {
            *self.0.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
        }
    }

    #[async_trait]
    impl ResourceEnumerator for FixedInventory {
        async fn enumerate(&self) -> Result<WindowInventory, HandlerError> {
            let windows = self
                .0
                .lock()
                .unwrap()
                .iter()
                .map(|id| WindowInfo::new(id.clone(), "t", "app", 0))
                .collect();
            Ok(WindowInventory {
                monitors: vec![MonitorInfo {
                    id: 0,
                    device: "DISPLAY1".to_string(),
                    width: 1920,
                    height: 1080,
                    primary: true,
                    applications: vec![AppWindows {
                        name: "app".to_string(),
                        windows,
                    }],
                }],
            })
        }
    }

    #[test]
    fn test_short_key_takes_suffix() {
        assert_eq!(short_key("0x0001234567890abc", 8), "67890abc");
        assert_eq!(short_key("abc", 8), "abc");
        assert_eq!(short_key("窗口窗口窗口窗口窗口", 3), "口窗口");
    }

    #[tokio::test]
    async fn test_unknown_before_first_refresh() {
        let resolver = ShortIdResolver::new(8);
        assert_eq!(resolver.resolve("aaaa1111").await, Resolution::NotFound("aaaa1111".to_string()));
        assert!(resolver.known().await.is_empty());
    }

    #[tokio::test]
    async fn test_expands_unique_short_id() {
        let inv = FixedInventory::new(&["hwnd_00000000aaaa1111", "hwnd_00000000bbbb2222"]);
        let resolver = ShortIdResolver::new(8);
        let res = resolver.refresh_and_resolve(&inv, "aaaa1111").await.unwrap();
        assert_eq!(res.resolved(), Some("hwnd_00000000aaaa1111"));
        let full = resolver.resolve("hwnd_00000000bbbb2222").await;
        assert_eq!(full, Resolution::Full("hwnd_00000000bbbb2222".to_string()));
    }

    #[tokio::test]
    async fn test_ambiguous_short_id_is_not_guessed() {
        let inv = FixedInventory::new(&["first_deadbeef", "second_deadbeef"]);
        let resolver = ShortIdResolver::new(8);
        let res = resolver.refresh_and_resolve(&inv, "deadbeef").await.unwrap();
        match res {
            Resolution::Ambiguous { candidates, .. } => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguous, got {:?}", other),
        }
        assert!(resolver.known().await.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_drops_closed_windows() {
        let inv = FixedInventory::new(&["w_11111111", "w_22222222"]);
        let resolver = ShortIdResolver::new(8);
        assert_eq!(resolver.refresh(&inv).await.unwrap(), 2);
        inv.set(&["w_22222222"]);
        resolver.refresh(&inv).await.unwrap();
        assert_eq!(resolver.resolve("11111111").await, Resolution::NotFound("11111111".to_string()));
        assert_eq!(resolver.resolve("22222222").await.resolved(), Some("w_22222222"));
    }
}
