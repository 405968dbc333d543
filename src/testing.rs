//! 测试辅助：脚本化的内存生成服务
//!
//! 按预设顺序返回回复和文件状态，并记录所有调用，供单元测试与集成测试使用

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::infrastructure::{Credential, GenerationRequest, GenerativeBackend};
use crate::models::asset::{AssetState, RemoteAsset};

#[derive(Default)]
struct Script {
    replies: VecDeque<Result<String, ServiceError>>,
    upload_errors: VecDeque<ServiceError>,
    /// 每次查询依次返回的状态，最后一个重复使用
    poll_states: VecDeque<AssetState>,
    uploads: usize,
    refreshes: usize,
    deleted: Vec<String>,
    instructions: Vec<String>,
    generate_keys: Vec<usize>,
}

/// 脚本化的生成服务
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<Script>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依次返回的生成结果；用完后返回服务错误
    pub fn with_replies(self, replies: Vec<Result<String, ServiceError>>) -> Self {
        self.lock().replies = replies.into();
        self
    }

    /// 上传后每次查询返回的状态；为空时上传直接返回 ACTIVE
    pub fn with_poll_states(self, states: Vec<AssetState>) -> Self {
        self.lock().poll_states = states.into();
        self
    }

    /// 依次返回的上传错误
    pub fn with_upload_errors(self, errors: Vec<ServiceError>) -> Self {
        self.lock().upload_errors = errors.into();
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn upload_count(&self) -> usize {
        self.lock().uploads
    }

    pub fn refresh_count(&self) -> usize {
        self.lock().refreshes
    }

    /// 已删除的远程文件名
    pub fn deleted(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    /// 收到的生成指令
    pub fn instructions(&self) -> Vec<String> {
        self.lock().instructions.clone()
    }

    /// 每次生成调用使用的密钥编号
    pub fn generate_keys(&self) -> Vec<usize> {
        self.lock().generate_keys.clone()
    }
}

#[async_trait]
impl GenerativeBackend for ScriptedBackend {
    async fn upload(
        &self,
        credential: &Credential,
        display_name: &str,
        data: Vec<u8>,
    ) -> Result<RemoteAsset, ServiceError> {
        let mut script = self.lock();
        if let Some(err) = script.upload_errors.pop_front() {
            return Err(err);
        }
        script.uploads += 1;

        let state = if script.poll_states.is_empty() {
            AssetState::Active
        } else {
            AssetState::Pending
        };
        Ok(RemoteAsset {
            name: format!("files/{}-{}", script.uploads, display_name),
            uri: format!("mem://files/{}", script.uploads),
            mime_type: "application/pdf".to_string(),
            state,
            size_bytes: data.len() as u64,
            owner: credential.id,
        })
    }

    async fn refresh(
        &self,
        _credential: &Credential,
        asset: &RemoteAsset,
    ) -> Result<RemoteAsset, ServiceError> {
        let mut script = self.lock();
        script.refreshes += 1;
        let state = if script.poll_states.len() > 1 {
            script.poll_states.pop_front()
        } else {
            script.poll_states.front().copied()
        }
        .unwrap_or(AssetState::Active);

        Ok(RemoteAsset {
            state,
            ..asset.clone()
        })
    }

    async fn delete(&self, _credential: &Credential, asset: &RemoteAsset) -> Result<(), ServiceError> {
        self.lock().deleted.push(asset.name.clone());
        Ok(())
    }

    async fn generate(
        &self,
        credential: &Credential,
        request: &GenerationRequest,
    ) -> Result<String, ServiceError> {
        let mut script = self.lock();
        script.instructions.push(request.instruction.clone());
        script.generate_keys.push(credential.id);
        script
            .replies
            .pop_front()
            .unwrap_or_else(|| {
                Err(ServiceError::Rejected {
                    status: 400,
                    message: "没有预设的回复".to_string(),
                })
            })
    }
}

/// 生成 `count` 道合法题目的 JSON 回复，题干编号从 `start + 1` 开始
pub fn sample_reply(count: usize, start: usize) -> String {
    let items: Vec<serde_json::Value> = (start + 1..=start + count)
        .map(|n| {
            let answer = ["A", "B", "C", "D"][n % 4];
            let difficulty = ["easy", "medium", "hard"][n % 3];
            serde_json::json!({
                "question": format!("Sample question {}?", n),
                "options": {"A": "alpha", "B": "beta", "C": "gamma", "D": "delta"},
                "correct_answer": answer,
                "explanation": format!("Explanation {}", n),
                "difficulty": difficulty,
                "topic": format!("Topic {}", n % 5),
                "subtopic": "basics",
            })
        })
        .collect();
    format!("```json\n{}\n```", serde_json::Value::Array(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::response_parser::parse_response;

    #[test]
    fn test_sample_reply_parses_into_numbered_items() {
        let batch = parse_response(&sample_reply(4, 2)).unwrap();
        assert_eq!(batch.items.len(), 4);
        assert_eq!(batch.dropped, 0);
        assert_eq!(batch.items[0].question, "Sample question 3?");
        // n = 3 → 答案 D，难度 easy
        assert_eq!(batch.items[0].correct_answer, "D");
        assert_eq!(batch.items[0].difficulty.to_string(), "easy");
    }
}
