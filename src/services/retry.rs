//! 重试与失败升级 - 业务能力层
//!
//! 对上传、轮询和生成调用统一处理：
//! - 服务过载（500/502/503/504、超时）：第 n 次等待 n × 步长后重试，有上限
//! - 配额耗尽（429）：标记密钥耗尽并轮换
//! - 其他服务错误：轮换一次密钥后重试
//!
//! 重试预算用尽返回 `GenerationFailed`；非服务错误原样返回。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::infrastructure::{Credential, KeyPool};

/// 重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 过载重试上限
    pub overload_retries: u32,
    /// 退避步长
    pub backoff_step: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            overload_retries: config.overload_retries,
            backoff_step: config.backoff_step(),
        }
    }
}

/// 带密钥轮换的重试执行器
#[derive(Clone)]
pub struct Escalation {
    policy: RetryPolicy,
    pool: Arc<KeyPool>,
}

impl Escalation {
    pub fn new(policy: RetryPolicy, pool: Arc<KeyPool>) -> Self {
        Self { policy, pool }
    }

    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    /// 执行 `op`，按错误类型退避或轮换密钥
    ///
    /// 每次调用前记录一次密钥使用；`credential` 始终更新为最后一次使用的密钥
    pub async fn execute<T, F, Fut>(
        &self,
        credential: &mut Credential,
        action: &str,
        mut op: F,
    ) -> AppResult<T>
    where
        F: FnMut(Credential) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut overloads: u32 = 0;
        let mut rotated = false;

        loop {
            let active = self.pool.record_use(credential)?;
            *credential = active.clone();

            let err = match op(active).await {
                Ok(value) => return Ok(value),
                Err(AppError::Service(e)) => e,
                Err(other) => return Err(other),
            };

            if err.is_overload() {
                overloads += 1;
                if overloads > self.policy.overload_retries {
                    return Err(AppError::generation_failed(format!(
                        "{}: 过载重试 {} 次后仍失败: {}",
                        action, self.policy.overload_retries, err
                    )));
                }
                let wait = self.policy.backoff_step * overloads;
                warn!(
                    "⚠️ {} 服务过载，{:?} 后重试 ({}/{}): {}",
                    action, wait, overloads, self.policy.overload_retries, err
                );
                tokio::time::sleep(wait).await;
            } else if err.is_quota() {
                warn!("⚠️ {} 密钥配额耗尽: {}", action, err);
                self.pool.mark_exhausted(credential);
                *credential = self.pool.rotate(credential)?;
            } else {
                if rotated {
                    return Err(AppError::generation_failed(format!("{}: {}", action, err)));
                }
                warn!("⚠️ {} 调用失败，轮换密钥后重试: {}", action, err);
                rotated = true;
                *credential = self.pool.rotate(credential)?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn escalation(keys: usize, quota: u32) -> Escalation {
        let tokens = (0..keys).map(|i| format!("AIzaSyK{}", i)).collect();
        let pool = Arc::new(KeyPool::new(tokens, HashMap::new(), quota));
        let policy = RetryPolicy {
            overload_retries: 3,
            backoff_step: Duration::from_millis(1),
        };
        Escalation::new(policy, pool)
    }

    #[tokio::test]
    async fn test_overload_backs_off_then_succeeds() {
        let esc = escalation(1, 100);
        let mut cred = esc.pool().assign("s").unwrap();
        let calls = AtomicUsize::new(0);

        let value = esc
            .execute(&mut cred, "生成", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(AppError::Service(ServiceError::from_status(503, "busy")))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_overload_budget_becomes_generation_failed() {
        let esc = escalation(1, 100);
        let mut cred = esc.pool().assign("s").unwrap();
        let calls = AtomicUsize::new(0);

        let err = esc
            .execute(&mut cred, "生成", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(AppError::Service(ServiceError::from_status(500, "down"))) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::GenerationFailed { .. }));
        // 首次调用 + 3 次重试
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_quota_marks_exhausted_and_rotates() {
        let esc = escalation(2, 100);
        let mut cred = esc.pool().assign("s").unwrap();
        let used = Mutex::new(Vec::new());

        let value = esc
            .execute(&mut cred, "生成", |c| {
                used.lock().unwrap().push(c.id);
                async move {
                    if c.id == 0 {
                        Err(AppError::Service(ServiceError::from_status(429, "quota")))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "ok");
        assert_eq!(*used.lock().unwrap(), vec![0, 1]);
        assert_eq!(cred.id, 1);
        assert_eq!(esc.pool().usable_count(), 1);
    }

    #[tokio::test]
    async fn test_quota_on_last_key_is_pool_exhausted() {
        let esc = escalation(1, 100);
        let mut cred = esc.pool().assign("s").unwrap();

        let err = esc
            .execute(&mut cred, "生成", |_| async {
                Err::<(), _>(AppError::Service(ServiceError::from_status(429, "quota")))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PoolExhausted));
    }

    #[tokio::test]
    async fn test_other_failure_rotates_once() {
        let esc = escalation(2, 100);
        let mut cred = esc.pool().assign("s").unwrap();
        let used = Mutex::new(Vec::new());

        let err = esc
            .execute(&mut cred, "生成", |c| {
                used.lock().unwrap().push(c.id);
                async { Err::<(), _>(AppError::Service(ServiceError::from_status(400, "bad"))) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::GenerationFailed { .. }));
        assert_eq!(*used.lock().unwrap(), vec![0, 1]);
        // 普通错误不会标记耗尽
        assert_eq!(esc.pool().usable_count(), 2);
    }

    #[tokio::test]
    async fn test_non_service_error_passes_through() {
        let esc = escalation(1, 100);
        let mut cred = esc.pool().assign("s").unwrap();

        let err = esc
            .execute(&mut cred, "上传", |_| async {
                Err::<(), _>(AppError::AssetRejected {
                    state: crate::models::AssetState::Failed,
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AssetRejected { .. }));
    }
}
