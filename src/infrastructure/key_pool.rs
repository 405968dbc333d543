//! API 密钥池 - 基础设施层
//!
//! ## 职责
//!
//! - 为每个科目分配密钥（固定映射优先，否则轮询）
//! - 配额耗尽时轮换到下一个可用密钥
//! - 记录每个密钥的调用次数
//!
//! 所有状态变更都在同一把锁内完成，由所有 worker 通过 `Arc` 共享。

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::models::loaders::load_api_keys;

/// 分发给 worker 的密钥
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// 密钥在池中的编号
    pub id: usize,
    pub token: String,
}

impl Credential {
    /// 日志中显示的脱敏形式
    pub fn masked(&self) -> String {
        let tail: String = self
            .token
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("#{} (...{})", self.id, tail)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug)]
struct KeySlot {
    token: String,
    usage: u32,
    exhausted: bool,
}

#[derive(Debug)]
struct PoolState {
    slots: Vec<KeySlot>,
    /// 下一次轮询分配的起点
    cursor: usize,
}

impl PoolState {
    fn credential(&self, id: usize) -> Credential {
        Credential {
            id,
            token: self.slots[id].token.clone(),
        }
    }

    /// 从 `start` 开始循环查找第一个可用密钥
    fn next_usable(&self, start: usize) -> Option<usize> {
        let len = self.slots.len();
        (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&i| !self.slots[i].exhausted)
    }

    fn usable_count(&self) -> usize {
        self.slots.iter().filter(|s| !s.exhausted).count()
    }
}

/// 密钥池
#[derive(Debug)]
pub struct KeyPool {
    state: Mutex<PoolState>,
    /// 科目 → 密钥编号
    mapping: HashMap<String, usize>,
    /// 单个密钥的调用上限
    quota: u32,
}

impl KeyPool {
    /// 创建密钥池
    pub fn new(tokens: Vec<String>, mapping: HashMap<String, usize>, quota: u32) -> Self {
        let slots = tokens
            .into_iter()
            .map(|token| KeySlot {
                token,
                usage: 0,
                exhausted: false,
            })
            .collect();

        Self {
            state: Mutex::new(PoolState { slots, cursor: 0 }),
            mapping,
            quota,
        }
    }

    /// 从密钥文件加载
    pub fn from_file(
        path: &Path,
        prefix: &str,
        mapping: HashMap<String, usize>,
        quota: u32,
    ) -> AppResult<Self> {
        let tokens =
            load_api_keys(path, prefix).map_err(|e| AppError::Config(format!("{:#}", e)))?;
        if tokens.is_empty() {
            return Err(AppError::Config(format!(
                "密钥文件中没有以 {} 开头的有效密钥: {}",
                prefix,
                path.display()
            )));
        }
        info!("🔑 已加载 {} 个 API 密钥", tokens.len());
        Ok(Self::new(tokens, mapping, quota))
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 为科目分配密钥
    ///
    /// 配置了固定映射时使用映射的密钥（已耗尽则顺延到下一个可用密钥），
    /// 否则按轮询顺序分配
    pub fn assign(&self, subject: &str) -> AppResult<Credential> {
        let mut state = self.lock();
        if state.slots.is_empty() {
            return Err(AppError::PoolExhausted);
        }

        if let Some(&mapped) = self.mapping.get(subject) {
            let start = mapped % state.slots.len();
            let id = state.next_usable(start).ok_or(AppError::PoolExhausted)?;
            return Ok(state.credential(id));
        }

        let cursor = state.cursor;
        let id = state.next_usable(cursor).ok_or(AppError::PoolExhausted)?;
        state.cursor = (id + 1) % state.slots.len();
        Ok(state.credential(id))
    }

    /// 轮换到 `current` 之后的下一个可用密钥
    ///
    /// 只有一个可用密钥且就是 `current` 时返回它本身
    pub fn rotate(&self, current: &Credential) -> AppResult<Credential> {
        let state = self.lock();
        if state.slots.is_empty() {
            return Err(AppError::PoolExhausted);
        }
        let start = (current.id + 1) % state.slots.len();
        let id = state.next_usable(start).ok_or(AppError::PoolExhausted)?;
        if id != current.id {
            info!("🔄 密钥轮换: {} → {}", current.masked(), state.credential(id).masked());
        }
        Ok(state.credential(id))
    }

    /// 标记密钥配额耗尽
    pub fn mark_exhausted(&self, credential: &Credential) {
        let mut state = self.lock();
        if let Some(slot) = state.slots.get_mut(credential.id) {
            if !slot.exhausted {
                slot.exhausted = true;
                warn!("⚠️ 密钥 {} 已耗尽 (已调用 {} 次)", credential.masked(), slot.usage);
            }
        }
    }

    /// 记录一次调用，返回本次调用实际使用的密钥
    ///
    /// `credential` 已耗尽时先轮换；计数达到上限后该密钥被标记为耗尽
    pub fn record_use(&self, credential: &Credential) -> AppResult<Credential> {
        let mut state = self.lock();
        let len = state.slots.len();
        if len == 0 {
            return Err(AppError::PoolExhausted);
        }

        let id = if state
            .slots
            .get(credential.id)
            .is_some_and(|slot| !slot.exhausted)
        {
            credential.id
        } else {
            state
                .next_usable((credential.id + 1) % len)
                .ok_or(AppError::PoolExhausted)?
        };

        let quota = self.quota;
        let slot = &mut state.slots[id];
        slot.usage += 1;
        if quota > 0 && slot.usage >= quota {
            slot.exhausted = true;
            warn!("⚠️ 密钥 #{} 达到调用上限 {}", id, quota);
        }
        Ok(state.credential(id))
    }

    /// 当前可用密钥数量
    pub fn usable_count(&self) -> usize {
        self.lock().usable_count()
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 每个密钥的调用次数（按编号）
    pub fn usage_snapshot(&self) -> Vec<u32> {
        self.lock().slots.iter().map(|s| s.usage).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize, quota: u32) -> KeyPool {
        let tokens = (0..n).map(|i| format!("AIzaSyKEY{}", i)).collect();
        KeyPool::new(tokens, HashMap::new(), quota)
    }

    #[test]
    fn test_assign_round_robin_for_unmapped_subjects() {
        let pool = pool(2, 100);
        let a = pool.assign("chemistry_chapters").unwrap();
        let b = pool.assign("physics_chapters").unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(pool.assign("biology_chapters").unwrap().id, a.id);
    }

    #[test]
    fn test_assign_uses_mapping_and_skips_exhausted() {
        let tokens = vec!["AIzaSyA".to_string(), "AIzaSyB".to_string(), "AIzaSyC".to_string()];
        let mapping = HashMap::from([("physics_chapters".to_string(), 1)]);
        let pool = KeyPool::new(tokens, mapping, 100);

        let mapped = pool.assign("physics_chapters").unwrap();
        assert_eq!(mapped.id, 1);

        pool.mark_exhausted(&mapped);
        assert_eq!(pool.assign("physics_chapters").unwrap().id, 2);
    }

    #[test]
    fn test_rotate_visits_all_usable_before_repeating() {
        let pool = pool(4, 100);
        let first = pool.assign("s").unwrap();
        pool.mark_exhausted(&Credential {
            id: 2,
            token: String::new(),
        });

        let mut seen = vec![first.id];
        let mut current = first;
        for _ in 0..2 {
            current = pool.rotate(&current).unwrap();
            seen.push(current.id);
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 3]);
        // 再轮换一次回到起点
        assert_eq!(pool.rotate(&current).unwrap().id, 0);
    }

    #[test]
    fn test_single_key_rotates_to_itself() {
        let pool = pool(1, 100);
        let only = pool.assign("s").unwrap();
        assert_eq!(pool.rotate(&only).unwrap(), only);
    }

    #[test]
    fn test_record_use_flags_quota_and_rotates() {
        let pool = pool(2, 2);
        let first = pool.assign("s").unwrap();

        assert_eq!(pool.record_use(&first).unwrap().id, 0);
        assert_eq!(pool.record_use(&first).unwrap().id, 0);
        // 第 0 号已达上限，自动换到第 1 号
        assert_eq!(pool.record_use(&first).unwrap().id, 1);
        assert_eq!(pool.usable_count(), 1);
        assert_eq!(pool.usage_snapshot(), vec![2, 1]);
    }

    #[test]
    fn test_exhausted_pool_errors() {
        let pool = pool(2, 1);
        let c = pool.assign("s").unwrap();
        pool.record_use(&c).unwrap();
        pool.record_use(&c).unwrap();
        assert_eq!(pool.usable_count(), 0);
        assert!(matches!(pool.assign("s"), Err(AppError::PoolExhausted)));
        assert!(matches!(pool.rotate(&c), Err(AppError::PoolExhausted)));
        assert!(matches!(pool.record_use(&c), Err(AppError::PoolExhausted)));
    }

    #[test]
    fn test_from_file_filters_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apikeys");
        std::fs::write(&path, "AIzaSyONE\n# comment\nAIzaSyTWO\n").unwrap();
        let pool = KeyPool::from_file(&path, "AIzaSy", HashMap::new(), 10).unwrap();
        assert_eq!(pool.len(), 2);

        std::fs::write(&path, "nothing useful\n").unwrap();
        assert!(KeyPool::from_file(&path, "AIzaSy", HashMap::new(), 10).is_err());
    }
}
