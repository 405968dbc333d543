//! 基础设施层
//!
//! 持有外部资源（HTTP 客户端、密钥池），不包含业务流程

pub mod backend;
pub mod gemini_client;
pub mod key_pool;

pub use backend::{GenerationRequest, GenerativeBackend, SamplingParams};
pub use gemini_client::GeminiClient;
pub use key_pool::{Credential, KeyPool};
